//! Single-partition strategy: everything on (0, 0).

use sim_graph::ConfigGraph;
use sim_model::RankInfo;

use crate::{Partitioner, PartitionerError};

/// Places every component on rank 0, thread 0. Only valid for a (1, 1)
/// world.
pub struct SinglePartitioner {
    world: RankInfo,
}

impl SinglePartitioner {
    /// Create the strategy for the given world size.
    #[must_use]
    pub fn new(world: RankInfo) -> Self {
        Self { world }
    }
}

impl Partitioner for SinglePartitioner {
    fn name(&self) -> &'static str {
        "single"
    }

    fn requires_config_graph(&self) -> bool {
        true
    }

    fn partition_config_graph(&self, graph: &mut ConfigGraph) -> Result<(), PartitionerError> {
        if self.world != RankInfo::new(1, 1) {
            return Err(PartitionerError::BadWorld {
                name: self.name(),
                world: self.world,
            });
        }
        graph.set_component_ranks(RankInfo::new(0, 0));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigns_everything_to_zero() {
        let mut g = ConfigGraph::new();
        for i in 0..3 {
            g.add_component(&format!("c{i}"), "t").unwrap();
        }
        SinglePartitioner::new(RankInfo::new(1, 1))
            .partition_config_graph(&mut g)
            .unwrap();
        assert!(g.components().iter().all(|c| c.rank == RankInfo::new(0, 0)));
    }

    #[test]
    fn test_rejects_parallel_world() {
        let mut g = ConfigGraph::new();
        let err = SinglePartitioner::new(RankInfo::new(2, 1)).partition_config_graph(&mut g);
        assert!(matches!(err, Err(PartitionerError::BadWorld { .. })));
    }

    #[test]
    fn test_partition_graph_unsupported() {
        let mut pg = sim_graph::PartitionGraph::new();
        let err = SinglePartitioner::new(RankInfo::new(1, 1)).partition_graph(&mut pg);
        assert!(matches!(
            err,
            Err(PartitionerError::UnsupportedRepresentation { .. })
        ));
    }
}
