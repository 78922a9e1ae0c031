//! The coarsened graph handed to partitioners.
//!
//! A [`PartitionGraph`] projects the configuration graph down to weighted
//! vertices and latency-weighted edges. Each vertex may stand for a single
//! component or for a whole group of components connected by no-cut links;
//! partitioners assign a rank to every vertex and the assignment is copied
//! back onto the underlying components.

use sim_model::ids::{ComponentId, LinkId};
use sim_model::svmap::MapKey;
use sim_model::time::SimTime;
use sim_model::{RankInfo, SparseVectorMap};

use crate::link::ConfigLink;

/// One vertex of the partition graph.
#[derive(Debug, Clone)]
pub struct PartitionComponent {
    /// Vertex id. For a collapsed graph this is a fresh dense numbering,
    /// not a component id.
    pub id: ComponentId,
    /// Summed weight of the member components.
    pub weight: f64,
    /// Rank assigned by the partitioner.
    pub rank: RankInfo,
    /// Links reaching outside this vertex's group.
    pub links: Vec<LinkId>,
    /// Member component ids.
    pub group: SparseVectorMap<ComponentId>,
}

impl PartitionComponent {
    /// Create an empty vertex.
    #[must_use]
    pub fn new(id: ComponentId) -> Self {
        Self {
            id,
            weight: 0.0,
            rank: RankInfo::new(RankInfo::UNASSIGNED, 0),
            links: Vec::new(),
            group: SparseVectorMap::new(),
        }
    }
}

impl MapKey for PartitionComponent {
    type Key = ComponentId;
    fn key(&self) -> ComponentId {
        self.id
    }
}

/// One edge of the partition graph.
#[derive(Debug, Clone)]
pub struct PartitionLink {
    /// Id of the underlying configuration link.
    pub id: LinkId,
    /// Endpoint vertices.
    pub components: [ComponentId; 2],
    /// Side latencies in cycles.
    pub latency: [SimTime; 2],
    /// Whether the partitioner is forbidden to cut this edge.
    pub no_cut: bool,
}

impl PartitionLink {
    /// Minimum latency across both sides.
    #[must_use]
    pub fn min_latency(&self) -> SimTime {
        self.latency[0].min(self.latency[1])
    }
}

impl From<&ConfigLink> for PartitionLink {
    fn from(link: &ConfigLink) -> Self {
        // A link may terminate on a subcomponent; the projection only deals
        // in top-level vertices.
        Self {
            id: link.id,
            components: [
                link.ends[0]
                    .component
                    .map_or(ComponentId::NULL, ComponentId::parent),
                link.ends[1]
                    .component
                    .map_or(ComponentId::NULL, ComponentId::parent),
            ],
            latency: [link.ends[0].latency.cycles(), link.ends[1].latency.cycles()],
            no_cut: link.no_cut,
        }
    }
}

impl MapKey for PartitionLink {
    type Key = LinkId;
    fn key(&self) -> LinkId {
        self.id
    }
}

/// The weighted graph projection used as partitioner input.
#[derive(Debug, Clone, Default)]
pub struct PartitionGraph {
    comps: SparseVectorMap<PartitionComponent>,
    links: SparseVectorMap<PartitionLink>,
}

impl PartitionGraph {
    /// Create an empty partition graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The vertex map.
    #[must_use]
    pub fn components(&self) -> &SparseVectorMap<PartitionComponent> {
        &self.comps
    }

    /// The vertex map, mutably.
    pub fn components_mut(&mut self) -> &mut SparseVectorMap<PartitionComponent> {
        &mut self.comps
    }

    /// The edge map.
    #[must_use]
    pub fn links(&self) -> &SparseVectorMap<PartitionLink> {
        &self.links
    }

    /// The edge map, mutably.
    pub fn links_mut(&mut self) -> &mut SparseVectorMap<PartitionLink> {
        &mut self.links
    }

    /// Number of vertices.
    #[must_use]
    pub fn num_components(&self) -> usize {
        self.comps.len()
    }
}
