//! Versioned record store boundary.
//!
//! The services only need point lookup, filtered lookup, insert and an atomic
//! compare-and-update. Every write bumps the row version, so read-modify-write
//! cycles detect concurrent writers instead of losing their updates.

pub mod in_memory;
pub mod seed;
pub mod r#trait;

use std::sync::Arc;

use fabline_inventory::{Installation, Material, ProductCamera};
use fabline_production::{Production, State};

pub use in_memory::InMemoryRecordStore;
pub use r#trait::{Record, RecordStore, StoreError, Versioned};
pub use seed::{ProductSeed, SeededProduct};

/// The tables the fulfillment services read and write.
#[derive(Clone)]
pub struct Stores {
    pub materials: Arc<dyn RecordStore<Material>>,
    pub products: Arc<dyn RecordStore<ProductCamera>>,
    pub productions: Arc<dyn RecordStore<Production>>,
    pub states: Arc<dyn RecordStore<State>>,
    pub installations: Arc<dyn RecordStore<Installation>>,
}

impl Stores {
    /// Fresh, empty in-memory tables (tests/dev).
    pub fn in_memory() -> Self {
        Self {
            materials: Arc::new(InMemoryRecordStore::<Material>::new()),
            products: Arc::new(InMemoryRecordStore::<ProductCamera>::new()),
            productions: Arc::new(InMemoryRecordStore::<Production>::new()),
            states: Arc::new(InMemoryRecordStore::<State>::new()),
            installations: Arc::new(InMemoryRecordStore::<Installation>::new()),
        }
    }
}

impl core::fmt::Debug for Stores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Record for Material {
    const KIND: &'static str = "material";
}

impl Record for ProductCamera {
    const KIND: &'static str = "product camera";
}

impl Record for Production {
    const KIND: &'static str = "production stage";
}

impl Record for State {
    const KIND: &'static str = "production state";
}

impl Record for Installation {
    const KIND: &'static str = "installation";
}
