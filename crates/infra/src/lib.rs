//! Infrastructure layer: record store, stock ledger, background scheduling and
//! the fulfillment services built on them.

pub mod config;
pub mod error;
pub mod fulfillment;
pub mod ledger;
pub mod production_run;
pub mod replacement;
pub mod replenishment;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::FablineConfig;
pub use error::FulfillmentError;
pub use fulfillment::Fulfillment;
pub use ledger::StockLedger;
pub use production_run::{ProduceOutcome, ProductionProgress, ProductionService, StageProgress};
pub use replacement::{ReplaceResponse, Replacement, ReplacementService};
pub use replenishment::{OrderReceipt, ReplenishmentScheduler, ReplenishmentTask};
pub use scheduler::{Registration, TaskKey, TaskRegistry, TickOutcome};
pub use store::{ProductSeed, SeededProduct, Stores};
