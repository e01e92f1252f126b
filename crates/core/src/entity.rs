//! Entity trait: identity that persists across state changes.

/// Minimal interface for domain entities.
///
/// An entity is defined by its identifier, not its field values: two records
/// with the same id are the same item at different points in time.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
