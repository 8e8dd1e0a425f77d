//! Seeding helpers for plants held in a record store.
//!
//! Records in these tables are normally created by external tooling; the
//! simulator and the tests use this builder to lay out a complete product.

use chrono::Utc;

use fabline_core::{InstallationId, MaterialId, ProductId, ProductionId};
use fabline_inventory::{Installation, InstallationStatus, Material, ProductCamera};
use fabline_production::{Production, STAGE_COUNT, State};

use super::{StoreError, Stores};

const DEFAULT_STAGE_NAMES: [&str; STAGE_COUNT] = ["assembly", "calibration", "inspection"];

/// Description of one product with its materials, stages and installations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSeed {
    name: String,
    stock: i64,
    materials: Vec<(String, i64)>,
    stage_work: [i64; STAGE_COUNT],
    installations: Vec<(String, InstallationStatus)>,
}

impl ProductSeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stock: 0,
            materials: Vec::new(),
            stage_work: [15; STAGE_COUNT],
            installations: Vec::new(),
        }
    }

    pub fn with_stock(mut self, stock: i64) -> Self {
        self.stock = stock;
        self
    }

    pub fn material(mut self, name: impl Into<String>, stock: i64) -> Self {
        self.materials.push((name.into(), stock));
        self
    }

    /// Remaining work of each stage's `Neutral` row, in position order.
    pub fn stage_work(mut self, work: [i64; STAGE_COUNT]) -> Self {
        self.stage_work = work;
        self
    }

    pub fn installation(mut self, location: impl Into<String>, status: InstallationStatus) -> Self {
        self.installations.push((location.into(), status));
        self
    }
}

/// Identifiers of everything a [`ProductSeed`] created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededProduct {
    pub product_id: ProductId,
    pub material_ids: Vec<MaterialId>,
    pub production_ids: Vec<ProductionId>,
    pub installation_ids: Vec<InstallationId>,
}

impl Stores {
    /// Insert every record described by `seed`.
    pub fn seed(&self, seed: &ProductSeed) -> Result<SeededProduct, StoreError> {
        let product_id = ProductId::new();
        self.products
            .insert(ProductCamera::new(product_id, seed.name.clone()).with_stock(seed.stock))?;

        let mut material_ids = Vec::with_capacity(seed.materials.len());
        for (name, stock) in &seed.materials {
            let id = MaterialId::new();
            self.materials
                .insert(Material::new(id, product_id, name.clone()).with_stock(*stock))?;
            material_ids.push(id);
        }

        let now = Utc::now();
        let mut production_ids = Vec::with_capacity(STAGE_COUNT);
        for (idx, (name, work)) in DEFAULT_STAGE_NAMES.iter().zip(seed.stage_work).enumerate() {
            let id = ProductionId::new();
            self.productions
                .insert(Production::new(id, product_id, *name, idx as i32 + 1))?;
            self.states.insert(State::neutral(id, work, now))?;
            production_ids.push(id);
        }

        let mut installation_ids = Vec::with_capacity(seed.installations.len());
        for (location, status) in &seed.installations {
            let id = InstallationId::new();
            self.installations.insert(
                Installation::new(id, product_id, location.clone()).with_status(*status),
            )?;
            installation_ids.push(id);
        }

        Ok(SeededProduct {
            product_id,
            material_ids,
            production_ids,
            installation_ids,
        })
    }
}
