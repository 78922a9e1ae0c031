//! # sim_model
//!
//! Foundation types for the parallel discrete-event simulation core.
//!
//! This crate provides:
//!
//! - [`ids`] - packed integer identifiers for components, subcomponents,
//!   links, and statistics.
//! - [`rank`] - the (rank, thread) placement pair.
//! - [`svmap`] - an ordered sparse vector map (O(log n) lookup, ordered
//!   iteration, bulk filter).
//! - [`params`] - the hierarchical string parameter store with interned keys
//!   and shared-set subscription.
//! - [`namecheck`] - the name grammar used for model entity names.
//! - [`time`] - simulated-time units, latency-string parsing, and the core
//!   time base.

pub mod ids;
pub mod namecheck;
pub mod params;
pub mod rank;
pub mod svmap;
pub mod time;

pub use ids::{ComponentId, LinkId, StatisticId};
pub use params::{Params, ParamsError};
pub use rank::RankInfo;
pub use svmap::{MapKey, SparseVectorMap};
pub use time::{SimTime, TimeBase, UnitValue, MAX_SIM_TIME};
