//! Graph-layer error types.

use sim_model::ids::{ComponentId, LinkId, StatisticId};
use sim_model::svmap::BadFilteredKey;
use sim_model::{ParamsError, RankInfo};

/// Errors raised while building, validating, or transforming the
/// configuration graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A component with this name already exists in the graph.
    #[error("component name already exists: {name}")]
    DuplicateComponentName {
        /// The offending name.
        name: String,
    },

    /// A subcomponent with the same (name, slot) already exists under the
    /// parent.
    #[error("subcomponent slot already filled: {name}[{slot}]")]
    DuplicateSubComponent {
        /// Slot name.
        name: String,
        /// Slot number.
        slot: i32,
    },

    /// No component with the given id.
    #[error("unknown component id: {0}")]
    UnknownComponent(ComponentId),

    /// No component with the given name.
    #[error("unknown component name: {0}")]
    UnknownComponentName(String),

    /// No link with the given id.
    #[error("unknown link id: {0}")]
    UnknownLink(LinkId),

    /// No statistic with the given id.
    #[error("unknown statistic id: {0}")]
    UnknownStatistic(StatisticId),

    /// A link was referenced by more than two components.
    #[error("link referenced more than two times: {name}")]
    LinkOverConnected {
        /// Link name.
        name: String,
    },

    /// A second component was attached to a link already marked non-local.
    #[error("attempting to connect second component to non-local link: {name}")]
    LinkNonLocalConflict {
        /// Link name.
        name: String,
    },

    /// A link was marked non-local twice, or after both sides connected.
    #[error("link cannot be set non-local: {name}")]
    LinkBadNonLocal {
        /// Link name.
        name: String,
    },

    /// A link was connected without a latency from either the connection or
    /// link creation.
    #[error("connecting link with no latency assigned: {name}")]
    LinkWithoutLatency {
        /// Link name.
        name: String,
    },

    /// Structural validation found problems (each already reported).
    #[error("configuration graph has {count} structural error(s)")]
    StructuralErrors {
        /// Number of problems found.
        count: usize,
    },

    /// A component connects a link to a port its type does not declare.
    #[error("unknown port '{port}' on component {component} of type {kind}")]
    UnknownPort {
        /// Port name.
        port: String,
        /// Component name.
        component: String,
        /// Component type.
        kind: String,
    },

    /// A port appears on two different links of the same component.
    #[error("port '{port}' of component {component} connected to two links: {first}, {second}")]
    PortReused {
        /// Port name.
        port: String,
        /// Component name.
        component: String,
        /// First link name.
        first: String,
        /// Second link name.
        second: String,
    },

    /// A component is unassigned or placed outside the world size.
    #[error("component {component} has bad rank {rank}")]
    BadRank {
        /// Component name.
        component: String,
        /// The offending placement.
        rank: RankInfo,
    },

    /// A statistic group references a statistic a member type does not
    /// support.
    #[error("component {component} does not support statistic {statistic}")]
    UnsupportedStatistic {
        /// Component name.
        component: String,
        /// Statistic name.
        statistic: String,
    },

    /// A statistic cannot be reused through the enable-all sentinel.
    #[error("cannot reuse a statistic through the enable-all sentinel")]
    ReuseAllStatistics,

    /// A stat-group frequency is neither a time nor a frequency.
    #[error("invalid statistic group frequency: {value}")]
    InvalidFrequency {
        /// The offending value.
        value: String,
    },

    /// A graph-split filter produced a key mismatch.
    #[error(transparent)]
    BadFilteredKey(#[from] BadFilteredKey),

    /// A unit string failed to parse.
    #[error(transparent)]
    Time(#[from] sim_model::time::TimeError),

    /// A parameter value failed to parse.
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// A model description could not be read.
    #[error("model error: {0}")]
    Model(String),
}
