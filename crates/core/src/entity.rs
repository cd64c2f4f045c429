//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// An account keeps its identity while its balance changes; two snapshots of
/// the same account at different versions are still the same entity.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
