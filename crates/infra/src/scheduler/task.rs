use fabline_core::{MaterialId, ProductId};

use crate::error::FulfillmentError;

/// Identity of a recurring task; at most one task runs per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Restocks one material from its pending-order counter.
    Replenishment(MaterialId),
    /// Drives one product's production run.
    Production(ProductId),
}

impl core::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TaskKey::Replenishment(id) => write!(f, "replenishment:{id}"),
            TaskKey::Production(id) => write!(f, "production:{id}"),
        }
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// More work remains; tick again next interval.
    Continue,
    /// The task reached its terminal condition.
    Finished,
    /// The tick failed; it is retried next interval.
    Failed(FulfillmentError),
}

/// Work driven forward one step per interval.
///
/// `tick` must be safe to call again after it returned `Finished` (a no-op
/// returning `Finished`).
pub trait RecurringTask: Send + Sync + 'static {
    fn tick(&self) -> TickOutcome;

    /// Re-evaluated under the registry lock before a finished task unregisters.
    ///
    /// Returning `false` keeps the task running (new work arrived after the
    /// tick that reported `Finished`).
    fn confirm_finished(&self) -> bool {
        true
    }
}
