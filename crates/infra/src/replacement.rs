//! Installation replacement: swap a broken installation for a stocked camera.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use fabline_core::{Entity, InstallationId, ProductId};
use fabline_inventory::{Installation, InstallationStatus};

use crate::error::FulfillmentError;
use crate::ledger::{StockLedger, update_with_retry};
use crate::store::{Record, RecordStore};

/// A completed replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub installation_id: InstallationId,
    pub product_id: ProductId,
    /// Finished units left after the replacement.
    pub remaining_stock: i64,
}

/// Flag-and-message result handed to external callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaceResponse {
    pub success: bool,
    pub message: String,
}

impl From<&Result<Replacement, FulfillmentError>> for ReplaceResponse {
    fn from(result: &Result<Replacement, FulfillmentError>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                message: "Installation replaced from stock".to_string(),
            },
            Err(FulfillmentError::OutOfStock(_)) => Self {
                success: false,
                message: "No cameras in stock to replace installation".to_string(),
            },
            Err(err) => Self {
                success: false,
                message: err.to_string(),
            },
        }
    }
}

/// Moves finished stock into the field.
#[derive(Clone)]
pub struct ReplacementService {
    installations: Arc<dyn RecordStore<Installation>>,
    ledger: Arc<StockLedger>,
    max_retries: u32,
}

impl core::fmt::Debug for ReplacementService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReplacementService")
            .field("ledger", &self.ledger)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ReplacementService {
    pub fn new(
        installations: Arc<dyn RecordStore<Installation>>,
        ledger: Arc<StockLedger>,
        max_retries: u32,
    ) -> Self {
        Self {
            installations,
            ledger,
            max_retries,
        }
    }

    /// Take one finished unit from the installation's product and mark the
    /// installation operational.
    ///
    /// The stock decrement is a single compare-and-update, so concurrent
    /// replacements never both consume the last unit. On failure the
    /// installation is left unchanged.
    pub fn replace(&self, installation_id: InstallationId) -> Result<Replacement, FulfillmentError> {
        let installation = self.installation(installation_id)?;
        let product_id = installation.product_id();

        let product = self.ledger.debit_product(product_id)?;

        let updated = update_with_retry(
            self.installations.as_ref(),
            &installation_id,
            self.max_retries,
            |i| {
                i.mark_operational();
                Ok(())
            },
        );
        if let Err(err) = updated {
            // Hand the unit back; the installation never received it.
            if let Err(undo) = self.ledger.return_product(product_id, 1) {
                error!(
                    installation_id = %installation_id,
                    product_id = %product_id,
                    error = %undo,
                    "failed to return unit after aborted replacement"
                );
            }
            return Err(err);
        }

        info!(
            installation_id = %installation_id,
            product_id = %product_id,
            remaining_stock = product.amount_in_stock(),
            "installation replaced"
        );
        Ok(Replacement {
            installation_id,
            product_id,
            remaining_stock: product.amount_in_stock(),
        })
    }

    pub fn installation(
        &self,
        installation_id: InstallationId,
    ) -> Result<Installation, FulfillmentError> {
        self.installations
            .get(&installation_id)?
            .map(|row| row.record)
            .ok_or_else(|| {
                FulfillmentError::not_found(format!("{} {installation_id}", Installation::KIND))
            })
    }

    /// Record that an installation broke down in the field.
    pub fn report_damage(
        &self,
        installation_id: InstallationId,
    ) -> Result<Installation, FulfillmentError> {
        let installation = update_with_retry(
            self.installations.as_ref(),
            &installation_id,
            self.max_retries,
            |i| {
                i.mark_damaged();
                Ok(())
            },
        )?;
        info!(installation_id = %installation_id, "installation reported damaged");
        Ok(installation)
    }

    pub fn damaged_installations(&self) -> Result<Vec<Installation>, FulfillmentError> {
        let mut damaged: Vec<Installation> = self
            .installations
            .find(&|i: &Installation| i.status() == InstallationStatus::Damaged)?
            .into_iter()
            .map(|row| row.record)
            .collect();
        damaged.sort_by(|a, b| {
            a.location()
                .cmp(b.location())
                .then_with(|| a.id().as_uuid().cmp(b.id().as_uuid()))
        });
        Ok(damaged)
    }

    /// Whether no installation is currently damaged.
    pub fn all_operational(&self) -> Result<bool, FulfillmentError> {
        Ok(self.damaged_installations()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::store::{ProductSeed, SeededProduct, Stores};

    fn setup(stock: i64, damaged: usize) -> (ReplacementService, SeededProduct) {
        let stores = Stores::in_memory();
        let mut seed = ProductSeed::new("dome").with_stock(stock);
        for n in 0..damaged {
            seed = seed.installation(format!("site-{n}"), InstallationStatus::Damaged);
        }
        let seeded = stores.seed(&seed).unwrap();
        let ledger = Arc::new(StockLedger::new(&stores, 64));
        let service = ReplacementService::new(stores.installations.clone(), ledger, 64);
        (service, seeded)
    }

    #[test]
    fn out_of_stock_leaves_installation_damaged() {
        let (service, seeded) = setup(0, 1);
        let id = seeded.installation_ids[0];

        let result = service.replace(id);
        assert!(matches!(result, Err(FulfillmentError::OutOfStock(_))));
        assert_eq!(service.installation(id).unwrap().status(), InstallationStatus::Damaged);

        let response = ReplaceResponse::from(&result);
        assert!(!response.success);
        assert_eq!(response.message, "No cameras in stock to replace installation");
    }

    #[test]
    fn last_unit_replaces_installation() {
        let (service, seeded) = setup(1, 1);
        let id = seeded.installation_ids[0];

        let replacement = service.replace(id).unwrap();
        assert_eq!(replacement.remaining_stock, 0);
        assert!(service.installation(id).unwrap().is_operational());
        assert_eq!(service.ledger.product(seeded.product_id).unwrap().amount_in_stock(), 0);
        assert!(service.all_operational().unwrap());
    }

    #[test]
    fn unknown_installation_is_not_found() {
        let (service, _) = setup(3, 0);
        let result = service.replace(InstallationId::new());

        assert!(matches!(result, Err(FulfillmentError::NotFound(_))));
        assert!(!ReplaceResponse::from(&result).success);
    }

    #[test]
    fn concurrent_replacements_never_double_spend() {
        let (service, seeded) = setup(1, 8);
        let service = Arc::new(service);

        let handles: Vec<_> = seeded
            .installation_ids
            .iter()
            .copied()
            .map(|id| {
                let service = service.clone();
                thread::spawn(move || service.replace(id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let out_of_stock = results
            .iter()
            .filter(|r| matches!(r, Err(FulfillmentError::OutOfStock(_))))
            .count();
        assert_eq!((successes, out_of_stock), (1, 7));
        assert_eq!(service.damaged_installations().unwrap().len(), 7);
        assert_eq!(service.ledger.product(seeded.product_id).unwrap().amount_in_stock(), 0);
    }

    #[test]
    fn report_damage_flags_installation() {
        let (service, seeded) = setup(0, 0);
        let installation = Installation::new(InstallationId::new(), seeded.product_id, "gate");
        let id = *installation.id();
        service.installations.insert(installation).unwrap();

        assert!(service.all_operational().unwrap());
        service.report_damage(id).unwrap();
        assert_eq!(service.damaged_installations().unwrap().len(), 1);
        assert!(!service.all_operational().unwrap());
    }
}
