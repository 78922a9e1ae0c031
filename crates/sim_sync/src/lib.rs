//! # sim_sync
//!
//! The synchronization manager: releases cross-partition events
//! just-in-time and bounds the time skew between partitions.
//!
//! Two planes cooperate:
//!
//! - [`rank`] - inter-rank sync, conducted collectively across all ranks
//!   through a [`Transport`](sim_net::Transport).
//! - [`thread`] - intra-rank sync across the threads of one process, using
//!   per-producer queues and a process-local barrier.
//!
//! [`manager`] ties the planes together: it schedules the next horizon at
//! the nearer of the rank and thread windows, piggybacks a thread sync on
//! every rank sync, and carries signal sets and checkpoint coordination
//! across the same collectives.

pub mod activity;
pub mod error;
pub mod manager;
pub mod queue;
pub mod rank;
pub mod thread;

pub use activity::{Activity, BinaryHeapTimeVortex, TimeVortex};
pub use error::SyncError;
pub use manager::{SendTarget, SyncManager, SyncOutcome, SyncShared, SyncType};
pub use queue::SyncQueue;
pub use rank::RankSync;
pub use thread::{ThreadSync, ThreadSyncShared};
