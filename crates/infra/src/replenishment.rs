//! Order replenishment: pending orders trickle into stock one unit per tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fabline_core::MaterialId;

use crate::error::FulfillmentError;
use crate::ledger::StockLedger;
use crate::scheduler::{RecurringTask, Registration, TaskKey, TaskRegistry, TickOutcome};

/// Result of a successfully placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderReceipt {
    pub material_id: MaterialId,
    /// Pending units after this order was added.
    pub amount_ordered: i64,
    pub task: Registration,
}

/// Places material orders and keeps one restocking task per material.
#[derive(Debug, Clone)]
pub struct ReplenishmentScheduler {
    ledger: Arc<StockLedger>,
    registry: Arc<TaskRegistry>,
    interval: Duration,
}

impl ReplenishmentScheduler {
    pub fn new(ledger: Arc<StockLedger>, registry: Arc<TaskRegistry>, interval: Duration) -> Self {
        Self {
            ledger,
            registry,
            interval,
        }
    }

    /// Add `amount` units to a material's pending orders and make sure a
    /// restocking task is running for it.
    ///
    /// Orders placed while a task runs accumulate into the same counter and
    /// are serviced by that task.
    pub fn place_order(
        &self,
        material_id: MaterialId,
        amount: i64,
    ) -> Result<OrderReceipt, FulfillmentError> {
        if amount <= 0 {
            return Err(FulfillmentError::validation(format!(
                "order amount must be positive (got {amount})"
            )));
        }

        let material = self.ledger.add_ordered(material_id, amount)?;
        // Counter first, registration second: a task finishing concurrently
        // re-checks the counter under the registry lock and sees this order.
        let task = self.registry.register(
            TaskKey::Replenishment(material_id),
            self.interval,
            Arc::new(self.task_for(material_id)),
        )?;

        info!(
            material_id = %material_id,
            amount,
            amount_ordered = material.amount_ordered(),
            task = ?task,
            "order placed"
        );
        Ok(OrderReceipt {
            material_id,
            amount_ordered: material.amount_ordered(),
            task,
        })
    }

    /// Restocking task for one material (also usable for manual ticking).
    pub fn task_for(&self, material_id: MaterialId) -> ReplenishmentTask {
        ReplenishmentTask {
            material_id,
            ledger: self.ledger.clone(),
        }
    }
}

/// Moves one pending unit of a material into stock per tick.
#[derive(Debug, Clone)]
pub struct ReplenishmentTask {
    material_id: MaterialId,
    ledger: Arc<StockLedger>,
}

impl RecurringTask for ReplenishmentTask {
    fn tick(&self) -> TickOutcome {
        match self.ledger.receive_one(self.material_id) {
            Ok(Some(material)) => {
                debug!(
                    material_id = %self.material_id,
                    amount_in_stock = material.amount_in_stock(),
                    amount_ordered = material.amount_ordered(),
                    "unit delivered"
                );
                TickOutcome::Continue
            }
            Ok(None) => TickOutcome::Finished,
            Err(FulfillmentError::NotFound(what)) => {
                warn!(material_id = %self.material_id, %what, "material vanished, stopping replenishment");
                TickOutcome::Finished
            }
            Err(err) => TickOutcome::Failed(err),
        }
    }

    fn confirm_finished(&self) -> bool {
        match self.ledger.material(self.material_id) {
            Ok(material) => material.amount_ordered() <= 0,
            Err(FulfillmentError::NotFound(_)) => true,
            // Unknown state: keep ticking, the next tick decides.
            Err(_) => false,
        }
    }
}
