//! # sim_graph
//!
//! The configuration graph: the in-memory representation of components,
//! subcomponents, links, parameters, and statistics from which a simulation
//! is elaborated.
//!
//! This crate provides:
//!
//! - [`component`] - [`ConfigComponent`] trees (a top-level component owns
//!   its subcomponent hierarchy and all of its statistics).
//! - [`link`] - [`ConfigLink`] with explicit build/final state transitions
//!   for latency and delivery order.
//! - [`stats`] - statistic configuration, groups, and outputs.
//! - [`graph`] - [`ConfigGraph`]: build, validate, split, and project.
//! - [`partition`] - the coarsened [`PartitionGraph`] handed to partitioners.
//! - [`registry`] - the element registry consulted for port and statistic
//!   validation.
//! - [`model`] - model readers (JSON, checkpoint restart).
//! - [`output`] - graph writers (JSON, XML, DOT).

pub mod component;
pub mod error;
pub mod graph;
pub mod link;
pub mod model;
pub mod output;
pub mod partition;
pub mod registry;
pub mod stats;

pub use component::{ConfigComponent, ConfigPortModule};
pub use error::GraphError;
pub use graph::{ConfigGraph, RestartState};
pub use link::{ConfigLink, LinkLatency, LinkOrder};
pub use partition::{PartitionComponent, PartitionGraph, PartitionLink};
pub use registry::{ElementInfo, ElementRegistry};
pub use stats::{ConfigStatGroup, ConfigStatOutput, ConfigStatistic, StatsConfig};
