//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Every record kept in a record store is an entity; the store keys rows by
/// [`Entity::id`].
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
