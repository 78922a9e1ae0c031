//! Round-robin strategy.
//!
//! Deals vertices across ranks in insertion order, bumping the thread on
//! each wrap. Ignores weights and topology; intended for quick smoke tests.

use sim_graph::PartitionGraph;
use sim_model::RankInfo;

use crate::{Partitioner, PartitionerError};

/// Round-robin placement over (rank, thread).
pub struct RoundRobinPartitioner {
    world: RankInfo,
}

impl RoundRobinPartitioner {
    /// Create the strategy for the given world size.
    #[must_use]
    pub fn new(world: RankInfo) -> Self {
        Self { world }
    }
}

impl Partitioner for RoundRobinPartitioner {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn partition_graph(&self, graph: &mut PartitionGraph) -> Result<(), PartitionerError> {
        let mut rank = RankInfo::new(0, 0);
        for comp in graph.components_mut().iter_mut() {
            comp.rank = rank;
            rank.rank += 1;
            if rank.rank == self.world.rank {
                rank.rank = 0;
                rank.thread = (rank.thread + 1) % self.world.thread;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_graph::ConfigGraph;

    #[test]
    fn test_round_robin_two_by_two() {
        let mut g = ConfigGraph::new();
        for i in 0..4 {
            g.add_component(&format!("c{i}"), "t").unwrap();
        }
        let mut pg = g.partition_graph();
        RoundRobinPartitioner::new(RankInfo::new(2, 2))
            .partition_graph(&mut pg)
            .unwrap();

        let ranks: Vec<RankInfo> = pg.components().iter().map(|c| c.rank).collect();
        assert_eq!(
            ranks,
            vec![
                RankInfo::new(0, 0),
                RankInfo::new(1, 0),
                RankInfo::new(0, 1),
                RankInfo::new(1, 1),
            ]
        );
    }

    #[test]
    fn test_wraps_back_to_start() {
        let mut g = ConfigGraph::new();
        for i in 0..5 {
            g.add_component(&format!("c{i}"), "t").unwrap();
        }
        let mut pg = g.partition_graph();
        RoundRobinPartitioner::new(RankInfo::new(2, 2))
            .partition_graph(&mut pg)
            .unwrap();
        // The fifth component lands back on (0, 0).
        assert_eq!(pg.components().iter().nth(4).unwrap().rank, RankInfo::new(0, 0));
    }
}
