//! Entry points invoked by external callers (UI handlers, the simulator).
//!
//! Every entry point validates synchronously and returns immediately; restocking
//! and production progress continue on background tasks. Callers observe
//! progress by re-reading state.

use std::sync::Arc;

use tracing::info;

use fabline_core::{InstallationId, MaterialId, ProductId};

use crate::config::FablineConfig;
use crate::error::FulfillmentError;
use crate::ledger::StockLedger;
use crate::production_run::{ProduceOutcome, ProductionProgress, ProductionService, ProductionSettings};
use crate::replacement::{ReplaceResponse, Replacement, ReplacementService};
use crate::replenishment::{OrderReceipt, ReplenishmentScheduler};
use crate::scheduler::TaskRegistry;
use crate::store::Stores;

/// The fulfillment core wired over one set of tables.
#[derive(Debug)]
pub struct Fulfillment {
    stores: Stores,
    ledger: Arc<StockLedger>,
    registry: Arc<TaskRegistry>,
    replenishment: ReplenishmentScheduler,
    production: ProductionService,
    replacement: ReplacementService,
}

impl Fulfillment {
    /// Wire the services; fails when `config` does not pass validation.
    pub fn new(stores: Stores, config: &FablineConfig) -> Result<Self, FulfillmentError> {
        config.validate()?;
        let ledger = Arc::new(StockLedger::new(&stores, config.max_conflict_retries));
        let registry = Arc::new(TaskRegistry::new(config.stall_threshold));

        let replenishment = ReplenishmentScheduler::new(
            ledger.clone(),
            registry.clone(),
            config.replenish_interval(),
        );
        let production = ProductionService::new(
            stores.clone(),
            ledger.clone(),
            registry.clone(),
            ProductionSettings::from(config),
        );
        let replacement = ReplacementService::new(
            stores.installations.clone(),
            ledger.clone(),
            config.max_conflict_retries,
        );

        info!(?config, "fulfillment core ready");
        Ok(Self {
            stores,
            ledger,
            registry,
            replenishment,
            production,
            replacement,
        })
    }

    /// Order `amount` units of a material; they restock one per interval.
    pub fn order(
        &self,
        material_id: MaterialId,
        amount: i64,
    ) -> Result<OrderReceipt, FulfillmentError> {
        self.replenishment.place_order(material_id, amount)
    }

    /// Start a production run for a product if its materials allow it.
    pub fn produce(&self, product_id: ProductId) -> Result<ProduceOutcome, FulfillmentError> {
        self.production.produce(product_id)
    }

    /// Replace a broken installation from finished stock.
    pub fn replace(
        &self,
        installation_id: InstallationId,
    ) -> Result<Replacement, FulfillmentError> {
        self.replacement.replace(installation_id)
    }

    /// `replace` flattened into the flag-and-message shape external callers expect.
    pub fn replace_response(&self, installation_id: InstallationId) -> ReplaceResponse {
        ReplaceResponse::from(&self.replace(installation_id))
    }

    pub fn progress(&self, product_id: ProductId) -> Result<ProductionProgress, FulfillmentError> {
        self.production.progress(product_id)
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn replenishment(&self) -> &ReplenishmentScheduler {
        &self.replenishment
    }

    pub fn production(&self) -> &ProductionService {
        &self.production
    }

    pub fn replacement(&self) -> &ReplacementService {
        &self.replacement
    }

    /// Stop all background tasks and wait for their workers.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}
