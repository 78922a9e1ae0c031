//! The (rank, thread) placement pair.

use serde::{Deserialize, Serialize};

/// Placement of a component: the cluster rank (an OS process) and the worker
/// thread within that rank.
///
/// Ordering is lexicographic on (rank, thread). A default-constructed
/// `RankInfo` is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RankInfo {
    /// Cluster rank.
    pub rank: u32,
    /// Worker thread within the rank.
    pub thread: u32,
}

impl RankInfo {
    /// Sentinel for an unassigned rank or thread.
    pub const UNASSIGNED: u32 = u32::MAX;

    /// Create a placement.
    #[must_use]
    pub const fn new(rank: u32, thread: u32) -> Self {
        Self { rank, thread }
    }

    /// Returns `true` if both rank and thread have been assigned.
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.rank != Self::UNASSIGNED && self.thread != Self::UNASSIGNED
    }

    /// Treating `self` as a world size, returns `true` if `other` is a valid
    /// placement within it (strictly smaller in both dimensions).
    #[must_use]
    pub const fn in_range(&self, other: &RankInfo) -> bool {
        self.rank > other.rank && self.thread > other.thread
    }

    /// Total number of partitions in a world of this size.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.rank * self.thread
    }
}

impl Default for RankInfo {
    fn default() -> Self {
        Self::new(Self::UNASSIGNED, Self::UNASSIGNED)
    }
}

impl std::fmt::Display for RankInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.rank, self.thread)
    }
}
