//! # sim_realtime
//!
//! The wall-clock control plane, orthogonal to simulated time.
//!
//! OS signals are captured by async-signal-safe handlers that only set
//! atomic flags ([`signals`]); the simulator polls those flags on its
//! normal cadence and the [`manager`] converts them into real-time actions
//! - immediately in serial runs, at the next sync horizon in parallel runs
//! so all ranks act coherently. Interval alarms ([`alarm`]) multiplex any
//! number of wall-clock periods onto a single OS alarm. The action catalog
//! lives in [`actions`].

pub mod actions;
pub mod alarm;
pub mod manager;
pub mod signals;

pub use actions::{
    CheckpointAction, ComponentStatusAction, CoreStatusAction, ExitCleanAction,
    ExitEmergencyAction, HeartbeatAction, HeartbeatShared, RealTimeAction, SimStatus,
};
pub use alarm::{AlarmAction, AlarmShared};
pub use manager::RealTimeManager;
