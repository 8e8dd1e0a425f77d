//! Stock ledger: atomic counter updates over the material and product tables.
//!
//! Every mutation is a read-version / compare-and-update cycle. A lost version
//! race is retried immediately, up to `max_retries` times, before surfacing as
//! [`FulfillmentError::ConcurrencyConflict`].

use std::sync::Arc;

use tracing::{debug, error};

use fabline_core::{DomainError, DomainResult, ExpectedVersion, MaterialId, ProductId};
use fabline_inventory::{Material, ProductCamera};

use crate::error::FulfillmentError;
use crate::store::{Record, RecordStore, StoreError, Stores};

/// Apply `mutate` to one row with optimistic retries.
pub(crate) fn update_with_retry<R: Record>(
    store: &dyn RecordStore<R>,
    id: &R::Id,
    max_retries: u32,
    mut mutate: impl FnMut(&mut R) -> DomainResult<()>,
) -> Result<R, FulfillmentError> {
    let mut attempt = 0;
    loop {
        let current = store
            .get(id)?
            .ok_or_else(|| FulfillmentError::not_found(format!("{} {id}", R::KIND)))?;

        match store.compare_and_update(id, ExpectedVersion::Exact(current.version), &mut mutate) {
            Ok(updated) => return Ok(updated.record),
            Err(StoreError::Conflict { actual, .. }) if attempt < max_retries => {
                attempt += 1;
                debug!(kind = R::KIND, id = %id, attempt, actual, "version race lost, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Apply a compensating `mutate` to one row against its current version.
///
/// Used to undo an earlier write of the same operation. The mutation runs
/// inside the store's atomic update, so no version race can be lost.
pub(crate) fn compensate<R: Record>(
    store: &dyn RecordStore<R>,
    id: &R::Id,
    mut mutate: impl FnMut(&mut R) -> DomainResult<()>,
) -> Result<R, FulfillmentError> {
    Ok(store
        .compare_and_update(id, ExpectedVersion::Any, &mut mutate)?
        .record)
}

/// Per-material and per-product quantity counters.
#[derive(Clone)]
pub struct StockLedger {
    materials: Arc<dyn RecordStore<Material>>,
    products: Arc<dyn RecordStore<ProductCamera>>,
    max_retries: u32,
}

impl StockLedger {
    pub fn new(stores: &Stores, max_retries: u32) -> Self {
        Self {
            materials: stores.materials.clone(),
            products: stores.products.clone(),
            max_retries,
        }
    }

    pub fn material(&self, id: MaterialId) -> Result<Material, FulfillmentError> {
        self.materials
            .get(&id)?
            .map(|row| row.record)
            .ok_or_else(|| FulfillmentError::not_found(format!("{} {id}", Material::KIND)))
    }

    pub fn product(&self, id: ProductId) -> Result<ProductCamera, FulfillmentError> {
        self.products
            .get(&id)?
            .map(|row| row.record)
            .ok_or_else(|| FulfillmentError::not_found(format!("{} {id}", ProductCamera::KIND)))
    }

    pub fn materials_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Material>, FulfillmentError> {
        Ok(self
            .materials
            .find(&|m: &Material| m.product_id() == product_id)?
            .into_iter()
            .map(|row| row.record)
            .collect())
    }

    /// Add `amount` units to a material's pending-order counter.
    pub fn add_ordered(&self, id: MaterialId, amount: i64) -> Result<Material, FulfillmentError> {
        update_with_retry(self.materials.as_ref(), &id, self.max_retries, |m| {
            m.place_order(amount)
        })
    }

    /// Move one pending unit of a material into stock.
    ///
    /// Returns `None` without writing when nothing is pending.
    pub fn receive_one(&self, id: MaterialId) -> Result<Option<Material>, FulfillmentError> {
        let received = update_with_retry(self.materials.as_ref(), &id, self.max_retries, |m| {
            if m.receive_one() {
                Ok(())
            } else {
                Err(DomainError::insufficient_stock("no ordered units pending"))
            }
        });
        match received {
            Ok(material) => Ok(Some(material)),
            Err(FulfillmentError::OutOfStock(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Withdraw `units` from every material of a product, all or nothing.
    ///
    /// Returns the materials that gave up `units`, or `None` (with every
    /// counter unchanged) when any material holds fewer than `units`.
    pub fn withdraw_for_production(
        &self,
        product_id: ProductId,
        units: i64,
    ) -> Result<Option<Vec<MaterialId>>, FulfillmentError> {
        let materials = self.materials_for_product(product_id)?;
        if !materials.iter().all(|m| m.can_supply(units)) {
            return Ok(None);
        }

        let mut withdrawn: Vec<MaterialId> = Vec::with_capacity(materials.len());
        for material in &materials {
            let id = *fabline_core::Entity::id(material);
            match update_with_retry(self.materials.as_ref(), &id, self.max_retries, |m| {
                m.consume(units)
            }) {
                Ok(_) => withdrawn.push(id),
                Err(err) => {
                    // Another consumer drained a material after the check above.
                    self.restore_materials(&withdrawn, units);
                    return match err {
                        FulfillmentError::OutOfStock(_) => Ok(None),
                        other => Err(other),
                    };
                }
            }
        }
        Ok(Some(withdrawn))
    }

    /// Give `units` back to exactly the materials a withdrawal took them from.
    pub fn return_for_production(&self, withdrawn: &[MaterialId], units: i64) {
        self.restore_materials(withdrawn, units);
    }

    fn restore_materials(&self, ids: &[MaterialId], units: i64) {
        for id in ids {
            if let Err(err) = compensate(self.materials.as_ref(), id, |m| m.restore(units)) {
                error!(material_id = %id, units, error = %err, "failed to restore withdrawn material units");
            }
        }
    }

    pub fn credit_product(
        &self,
        id: ProductId,
        units: i64,
    ) -> Result<ProductCamera, FulfillmentError> {
        update_with_retry(self.products.as_ref(), &id, self.max_retries, |p| p.credit(units))
    }

    /// Hand `units` back to a product after an aborted debit.
    pub fn return_product(
        &self,
        id: ProductId,
        units: i64,
    ) -> Result<ProductCamera, FulfillmentError> {
        compensate(self.products.as_ref(), &id, |p| p.credit(units))
    }

    /// Take one finished unit out of stock; `OutOfStock` when none is left.
    pub fn debit_product(&self, id: ProductId) -> Result<ProductCamera, FulfillmentError> {
        update_with_retry(self.products.as_ref(), &id, self.max_retries, |p| p.debit_one())
    }
}

impl core::fmt::Debug for StockLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StockLedger")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
