//! Error taxonomy of the fulfillment services.

use thiserror::Error;

use fabline_core::DomainError;

use crate::store::StoreError;

/// Failure surfaced by an entry point or recorded by a background tick.
///
/// `Validation`, `NotFound` and `OutOfStock` are returned synchronously with no
/// state mutated. `TransientStorage` and `ConcurrencyConflict` are retryable:
/// background ticks log them and try again on the next interval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FulfillmentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("out of stock: {0}")]
    OutOfStock(String),

    #[error("transient storage failure: {0}")]
    TransientStorage(String),

    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("scheduler failure: {0}")]
    Scheduler(String),
}

impl FulfillmentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FulfillmentError::TransientStorage(_) | FulfillmentError::ConcurrencyConflict(_)
        )
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::InvariantViolation(msg) => Self::Validation(format!("invariant: {msg}")),
            DomainError::InsufficientStock(msg) => Self::OutOfStock(msg),
            DomainError::Conflict(msg) => Self::ConcurrencyConflict(msg),
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyExists(what) => Self::Validation(format!("{what} already exists")),
            err @ StoreError::Conflict { .. } => Self::ConcurrencyConflict(err.to_string()),
            StoreError::Rejected(domain) => domain.into(),
            StoreError::Unavailable(msg) => Self::TransientStorage(msg),
        }
    }
}
