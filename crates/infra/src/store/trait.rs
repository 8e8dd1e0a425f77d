use std::sync::Arc;

use thiserror::Error;

use fabline_core::{DomainError, DomainResult, Entity, ExpectedVersion};

/// A row type that can live in a [`RecordStore`].
pub trait Record: Entity + Clone + Send + Sync + 'static {
    /// Human-readable table name used in errors and logs.
    const KIND: &'static str;
}

/// A stored row together with its write version.
///
/// Versions start at 1 on insert and increase by exactly 1 per successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<R> {
    pub record: R,
    pub version: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("version conflict on {id} (expected {expected:?}, found {actual})")]
    Conflict {
        id: String,
        expected: ExpectedVersion,
        actual: u64,
    },

    /// The update closure refused the change; nothing was written.
    #[error("update rejected: {0}")]
    Rejected(#[from] DomainError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-based record store with an atomic compare-and-update.
pub trait RecordStore<R: Record>: Send + Sync {
    /// Point lookup by identity.
    fn get(&self, id: &R::Id) -> Result<Option<Versioned<R>>, StoreError>;

    /// Filtered lookup; returns every row matching `predicate`.
    fn find(&self, predicate: &dyn Fn(&R) -> bool) -> Result<Vec<Versioned<R>>, StoreError>;

    /// Insert a new row at version 1.
    fn insert(&self, record: R) -> Result<Versioned<R>, StoreError>;

    /// Atomically check the row version and apply `mutate` to it.
    ///
    /// The version check and the write happen as one step: no other writer can
    /// interleave. If `mutate` returns an error the row is left untouched and
    /// the error is returned as [`StoreError::Rejected`].
    fn compare_and_update(
        &self,
        id: &R::Id,
        expected: ExpectedVersion,
        mutate: &mut dyn FnMut(&mut R) -> DomainResult<()>,
    ) -> Result<Versioned<R>, StoreError>;
}

impl<R, S> RecordStore<R> for Arc<S>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    fn get(&self, id: &R::Id) -> Result<Option<Versioned<R>>, StoreError> {
        (**self).get(id)
    }

    fn find(&self, predicate: &dyn Fn(&R) -> bool) -> Result<Vec<Versioned<R>>, StoreError> {
        (**self).find(predicate)
    }

    fn insert(&self, record: R) -> Result<Versioned<R>, StoreError> {
        (**self).insert(record)
    }

    fn compare_and_update(
        &self,
        id: &R::Id,
        expected: ExpectedVersion,
        mutate: &mut dyn FnMut(&mut R) -> DomainResult<()>,
    ) -> Result<Versioned<R>, StoreError> {
        (**self).compare_and_update(id, expected, mutate)
    }
}
