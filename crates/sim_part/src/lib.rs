//! # sim_part
//!
//! Graph partitioners. Each strategy implements [`Partitioner`] over either
//! the coarsened [`PartitionGraph`] or the raw
//! [`ConfigGraph`](sim_graph::ConfigGraph); the driver picks the
//! representation from the capability flags. Strategies are constructed by
//! name through the [`PartitionerRegistry`], populated at startup.

use std::collections::HashMap;

use sim_graph::{ConfigGraph, PartitionGraph};
use sim_model::RankInfo;

pub mod bisection;
pub mod csr;
pub mod rrobin;
pub mod single;

pub use bisection::BisectionPartitioner;
pub use csr::{CsrGraph, CsrPartitioner, GreedyKway, KwayBackend};
pub use rrobin::RoundRobinPartitioner;
pub use single::SinglePartitioner;

/// Errors raised by partitioners.
#[derive(Debug, thiserror::Error)]
pub enum PartitionerError {
    /// The partitioner does not support the supplied graph representation.
    #[error("partitioner '{name}' does not support this graph representation")]
    UnsupportedRepresentation {
        /// Partitioner name.
        name: &'static str,
    },

    /// No partitioner registered under this name.
    #[error("unknown partitioner: {0}")]
    UnknownPartitioner(String),

    /// The world size is not valid for this strategy.
    #[error("partitioner '{name}' cannot partition for world {world}")]
    BadWorld {
        /// Partitioner name.
        name: &'static str,
        /// The offending world size.
        world: RankInfo,
    },

    /// An external k-way backend failed.
    #[error("k-way backend error: {0}")]
    Backend(String),
}

/// A graph partitioning strategy.
///
/// The result of a successful call is that every component (or partition
/// vertex) has a rank assigned.
pub trait Partitioner {
    /// Strategy name, as registered.
    fn name(&self) -> &'static str;

    /// Partition the coarsened graph.
    ///
    /// # Errors
    ///
    /// [`PartitionerError::UnsupportedRepresentation`] unless overridden.
    fn partition_graph(&self, graph: &mut PartitionGraph) -> Result<(), PartitionerError> {
        let _ = graph;
        Err(PartitionerError::UnsupportedRepresentation { name: self.name() })
    }

    /// Partition the configuration graph directly. No-cut links are not
    /// honored in this representation.
    ///
    /// # Errors
    ///
    /// [`PartitionerError::UnsupportedRepresentation`] unless overridden.
    fn partition_config_graph(&self, graph: &mut ConfigGraph) -> Result<(), PartitionerError> {
        let _ = graph;
        Err(PartitionerError::UnsupportedRepresentation { name: self.name() })
    }

    /// Whether this strategy needs the raw configuration graph.
    fn requires_config_graph(&self) -> bool {
        false
    }

    /// Whether this strategy runs on every rank (rather than rank 0 only).
    fn spawn_on_all_ranks(&self) -> bool {
        false
    }
}

type Constructor = fn(world: RankInfo, my_rank: RankInfo, verbosity: u32) -> Box<dyn Partitioner>;

/// Name → constructor registry for partitioning strategies.
pub struct PartitionerRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl PartitionerRegistry {
    /// A registry populated with the built-in strategies.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut reg = Self {
            constructors: HashMap::new(),
        };
        reg.register("single", |w, _, _| Box::new(SinglePartitioner::new(w)));
        reg.register("roundrobin", |w, _, _| Box::new(RoundRobinPartitioner::new(w)));
        reg.register("simple", |w, _, _| Box::new(BisectionPartitioner::new(w)));
        reg.register("kway", |w, _, v| {
            Box::new(CsrPartitioner::new(w, v, GreedyKway))
        });
        reg
    }

    /// Register a strategy constructor under a name.
    pub fn register(&mut self, name: &'static str, ctor: Constructor) {
        self.constructors.insert(name, ctor);
    }

    /// Construct a strategy by name.
    ///
    /// # Errors
    ///
    /// [`PartitionerError::UnknownPartitioner`] for an unregistered name.
    pub fn create(
        &self,
        name: &str,
        world: RankInfo,
        my_rank: RankInfo,
        verbosity: u32,
    ) -> Result<Box<dyn Partitioner>, PartitionerError> {
        self.constructors
            .get(name)
            .map(|ctor| ctor(world, my_rank, verbosity))
            .ok_or_else(|| PartitionerError::UnknownPartitioner(name.to_string()))
    }

    /// Registered strategy names.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for PartitionerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Decompose a flat partition index into (rank, thread) for a world with
/// the given thread count.
#[must_use]
pub fn rank_from_flat(flat: u64, threads: u32) -> RankInfo {
    RankInfo::new((flat / u64::from(threads)) as u32, (flat % u64::from(threads)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_builtins() {
        let reg = PartitionerRegistry::with_builtins();
        assert_eq!(reg.names(), vec!["kway", "roundrobin", "simple", "single"]);
        assert!(reg
            .create("roundrobin", RankInfo::new(2, 2), RankInfo::new(0, 0), 0)
            .is_ok());
        assert!(matches!(
            reg.create("nope", RankInfo::new(1, 1), RankInfo::new(0, 0), 0),
            Err(PartitionerError::UnknownPartitioner(_))
        ));
    }

    #[test]
    fn test_rank_from_flat() {
        assert_eq!(rank_from_flat(0, 2), RankInfo::new(0, 0));
        assert_eq!(rank_from_flat(1, 2), RankInfo::new(0, 1));
        assert_eq!(rank_from_flat(5, 2), RankInfo::new(2, 1));
    }
}
