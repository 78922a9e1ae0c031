//! Packed integer identifiers for model entities.
//!
//! All entity identifiers are plain integers so they can be compared, hashed,
//! and shipped over the wire without any indirection. A [`ComponentId`] packs
//! the owning top-level component and the subcomponent slot into one `u64`;
//! masking recovers the parent from any child.

use serde::{Deserialize, Serialize};

/// Number of low bits holding the top-level component index.
pub const COMPONENT_ID_BITS: u32 = 32;

/// Bit flagging a subcomponent that was created anonymously (not named in
/// the model description).
const ANONYMOUS_FLAG: u64 = 1 << 63;

/// Mask selecting the top-level component portion of an id.
const TOP_LEVEL_MASK: u64 = (1 << COMPONENT_ID_BITS) - 1;

/// A unique component or subcomponent identifier.
///
/// The low 32 bits identify the top-level component; the next 31 bits hold
/// the subcomponent number within that component (zero for the top-level
/// component itself). The high bit marks anonymously created subcomponents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl ComponentId {
    /// Sentinel for an unset component reference.
    pub const NULL: ComponentId = ComponentId(u64::MAX);

    /// Create the id of a top-level component from its index.
    #[must_use]
    pub const fn top_level(index: u32) -> Self {
        Self(index as u64)
    }

    /// Create a subcomponent id under the given parent.
    ///
    /// The parent may itself be a subcomponent; only its top-level portion is
    /// carried into the child. The sub index is allocated by the top-level
    /// component and is unique within it.
    #[must_use]
    pub const fn subcomponent(parent: ComponentId, sub_index: u16) -> Self {
        Self((parent.0 & TOP_LEVEL_MASK) | ((sub_index as u64) << COMPONENT_ID_BITS))
    }

    /// Mark this id as belonging to an anonymously created subcomponent.
    #[must_use]
    pub const fn anonymous(self) -> Self {
        Self(self.0 | ANONYMOUS_FLAG)
    }

    /// Returns the id of the owning top-level component.
    #[must_use]
    pub const fn parent(self) -> Self {
        Self(self.0 & TOP_LEVEL_MASK)
    }

    /// Returns `true` if this id names a top-level component.
    #[must_use]
    pub const fn is_top_level(self) -> bool {
        self.0 & !TOP_LEVEL_MASK == 0
    }

    /// Returns `true` if this subcomponent was created anonymously.
    #[must_use]
    pub const fn is_anonymous(self) -> bool {
        self.0 & ANONYMOUS_FLAG != 0
    }

    /// Returns `true` if this is a valid (non-sentinel) id.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    /// Raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_top_level() {
            write!(f, "{}", self.0)
        } else {
            write!(
                f,
                "{}:{}",
                self.0 & TOP_LEVEL_MASK,
                (self.0 & !ANONYMOUS_FLAG) >> COMPONENT_ID_BITS
            )
        }
    }
}

/// A link identifier.
///
/// Link ids are unique within a rank only; after a parallel load each rank
/// numbers its own links. Cross-rank identity is carried by the link's
/// delivery-order tag, never by the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl LinkId {
    /// Raw value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A statistic identifier.
///
/// The high 32 bits hold the owning top-level component's index; the low
/// 32 bits are a per-component counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatisticId(pub u64);

impl StatisticId {
    /// Sentinel for an unset statistic reference.
    pub const NULL: StatisticId = StatisticId(u64::MAX);

    /// Sentinel used when all statistics of a component are enabled at once.
    pub const ALL: StatisticId = StatisticId(u64::MAX - 1);

    /// Create a statistic id owned by the given component.
    #[must_use]
    pub const fn new(owner: ComponentId, counter: u16) -> Self {
        Self(((owner.0 & TOP_LEVEL_MASK) << 32) | counter as u64)
    }

    /// Returns the owning top-level component.
    #[must_use]
    pub const fn component(self) -> ComponentId {
        ComponentId(self.0 >> 32)
    }

    /// Returns `true` if this is a valid (non-sentinel) id.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::NULL.0 && self.0 != Self::ALL.0
    }
}

impl std::fmt::Display for StatisticId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

// Bare ids act as their own keys, giving set-like sparse maps.

impl crate::svmap::MapKey for ComponentId {
    type Key = ComponentId;
    fn key(&self) -> ComponentId {
        *self
    }
}

impl crate::svmap::MapKey for LinkId {
    type Key = LinkId;
    fn key(&self) -> LinkId {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_roundtrip() {
        let id = ComponentId::top_level(42);
        assert!(id.is_top_level());
        assert_eq!(id.parent(), id);
        assert_eq!(id.raw(), 42);
    }

    #[test]
    fn test_subcomponent_parent_recovery() {
        let parent = ComponentId::top_level(7);
        let sub = ComponentId::subcomponent(parent, 3);
        assert!(!sub.is_top_level());
        assert_eq!(sub.parent(), parent);

        // A child of a subcomponent still points at the same top level.
        let nested = ComponentId::subcomponent(sub, 9);
        assert_eq!(nested.parent(), parent);
    }

    #[test]
    fn test_anonymous_flag() {
        let sub = ComponentId::subcomponent(ComponentId::top_level(1), 2).anonymous();
        assert!(sub.is_anonymous());
        assert_eq!(sub.parent(), ComponentId::top_level(1));
    }

    #[test]
    fn test_statistic_owner() {
        let owner = ComponentId::top_level(11);
        let sid = StatisticId::new(owner, 4);
        assert_eq!(sid.component(), owner);
        assert!(sid.is_valid());
        assert!(!StatisticId::NULL.is_valid());
        assert!(!StatisticId::ALL.is_valid());
    }

    #[test]
    fn test_component_id_serialization_roundtrip() {
        let id = ComponentId::subcomponent(ComponentId::top_level(5), 1);
        let bytes = rmp_serde::to_vec(&id).unwrap();
        let restored: ComponentId = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(id, restored);
    }
}
