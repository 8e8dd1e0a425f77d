//! Optimistic concurrency primitives shared by record stores.

/// Optimistic concurrency expectation for a stored row.
///
/// Every successful write bumps a row's version by one; a writer that read
/// version `n` passes `Exact(n)` so a concurrent write in between is detected
/// instead of silently overwritten.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking. For compensating writes: the mutation is applied
    /// to whatever the row holds at write time and never loses a race.
    Any,
    /// Require the row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
