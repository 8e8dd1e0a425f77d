use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use fabline_core::{DomainResult, ExpectedVersion};

use super::r#trait::{Record, RecordStore, StoreError, Versioned};

/// In-memory versioned table.
///
/// Intended for tests/dev. A single `RwLock` serialises writers, which makes
/// every `compare_and_update` atomic. `fail_next` injects transient failures so
/// retry paths can be exercised.
#[derive(Debug)]
pub struct InMemoryRecordStore<R: Record> {
    rows: RwLock<HashMap<R::Id, Versioned<R>>>,
    injected_failures: AtomicUsize,
}

impl<R: Record> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Unavailable(format!(
                "injected failure on {} table",
                R::KIND
            ))),
            Err(_) => Ok(()),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable(format!("{} table lock poisoned", R::KIND))
    }
}

impl<R: Record> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    fn get(&self, id: &R::Id) -> Result<Option<Versioned<R>>, StoreError> {
        self.check_injected_failure()?;
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.get(id).cloned())
    }

    fn find(&self, predicate: &dyn Fn(&R) -> bool) -> Result<Vec<Versioned<R>>, StoreError> {
        self.check_injected_failure()?;
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .values()
            .filter(|row| predicate(&row.record))
            .cloned()
            .collect())
    }

    fn insert(&self, record: R) -> Result<Versioned<R>, StoreError> {
        self.check_injected_failure()?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let id = *record.id();
        if rows.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("{} {id}", R::KIND)));
        }
        let row = Versioned { record, version: 1 };
        rows.insert(id, row.clone());
        Ok(row)
    }

    fn compare_and_update(
        &self,
        id: &R::Id,
        expected: ExpectedVersion,
        mutate: &mut dyn FnMut(&mut R) -> DomainResult<()>,
    ) -> Result<Versioned<R>, StoreError> {
        self.check_injected_failure()?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("{} {id}", R::KIND)))?;

        if !expected.matches(row.version) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected,
                actual: row.version,
            });
        }

        // Mutate a copy so a rejected change leaves the row untouched.
        let mut next = row.record.clone();
        mutate(&mut next)?;
        row.record = next;
        row.version += 1;
        Ok(row.clone())
    }
}
