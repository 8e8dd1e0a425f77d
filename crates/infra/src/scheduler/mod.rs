//! Recurring-task substrate.
//!
//! ## Design
//!
//! - One worker thread per task key; ticks of a task never overlap
//! - Registration is idempotent: a key already running is joined, not duplicated
//! - A task that reports `Finished` is re-checked under the registry lock before
//!   it unregisters, so work queued concurrently with its last tick is not lost
//! - Failed ticks are logged and retried on the next interval; a task failing
//!   `stall_threshold` times in a row is reported as stalled

pub mod registry;
pub mod task;

pub use registry::{Registration, TaskRegistry, TaskStats};
pub use task::{RecurringTask, TaskKey, TickOutcome};
