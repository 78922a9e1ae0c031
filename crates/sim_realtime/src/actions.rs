//! The real-time action catalog.
//!
//! Real-time actions are plain objects scheduled by the real-time manager;
//! they never run inside a signal handler. Each action sees the simulation
//! through the [`SimStatus`] context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{SystemTime, UNIX_EPOCH};

use sim_model::time::UnitValue;
use sim_model::RankInfo;
use sim_net::messages::HeartbeatStats;
use sim_net::Transport;

/// The simulation surface real-time actions act on.
pub trait SimStatus {
    /// This partition's placement.
    fn rank(&self) -> RankInfo;

    /// World size.
    fn num_ranks(&self) -> RankInfo;

    /// Elapsed simulated time, rendered for output.
    fn elapsed_sim_time(&self) -> String;

    /// Per-rank resource numbers for heartbeat aggregation.
    fn heartbeat_stats(&self) -> HeartbeatStats;

    /// Print scheduler status; with `component_status`, each component
    /// reports as well.
    fn print_status(&mut self, component_status: bool);

    /// Request shutdown at the next opportunity.
    fn signal_shutdown(&mut self, abnormal: bool);

    /// Schedule a checkpoint at the current simulated cycle.
    fn schedule_checkpoint(&mut self);

    /// The rank transport, when the world spans multiple ranks.
    fn transport(&self) -> Option<&dyn Transport>;
}

/// A wall-clock-driven action.
pub trait RealTimeAction: Send {
    /// Action name for logs.
    fn name(&self) -> &'static str;

    /// Called once when the manager starts, with the first scheduled fire
    /// time (unix seconds; zero when unscheduled).
    fn begin(&mut self, _scheduled_time: u64) {}

    /// Perform the action.
    fn execute(&mut self, ctx: &mut dyn SimStatus);

    /// Whether this action can initiate checkpoints (the run must then set
    /// up checkpoint infrastructure).
    fn can_initiate_checkpoint(&self) -> bool {
        false
    }
}

/// Clean shutdown: banner, elapsed simulated time, normal exit.
pub struct ExitCleanAction;

impl RealTimeAction for ExitCleanAction {
    fn name(&self) -> &'static str {
        "exit-clean"
    }

    fn begin(&mut self, scheduled_time: u64) {
        if scheduled_time != 0 {
            tracing::info!(at_unix = scheduled_time, "run will end by scheduled wall-clock time");
        }
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        let rank = ctx.rank();
        tracing::info!(
            rank = rank.rank,
            thread = rank.thread,
            simulated_time = ctx.elapsed_sim_time(),
            "exit-after time reached; shutting down"
        );
        ctx.signal_shutdown(false);
    }
}

/// Emergency shutdown: banner, abnormal exit code.
pub struct ExitEmergencyAction;

impl RealTimeAction for ExitEmergencyAction {
    fn name(&self) -> &'static str {
        "exit-emergency"
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        let rank = ctx.rank();
        tracing::error!(
            rank = rank.rank,
            thread = rank.thread,
            simulated_time = ctx.elapsed_sim_time(),
            "emergency shutdown"
        );
        ctx.signal_shutdown(true);
    }
}

/// Print scheduler status only.
pub struct CoreStatusAction;

impl RealTimeAction for CoreStatusAction {
    fn name(&self) -> &'static str {
        "core-status"
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        ctx.print_status(false);
    }
}

/// Print scheduler status and delegate to each component.
pub struct ComponentStatusAction;

impl RealTimeAction for ComponentStatusAction {
    fn name(&self) -> &'static str {
        "component-status"
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        ctx.print_status(true);
    }
}

/// Schedule a checkpoint at the current simulated cycle.
pub struct CheckpointAction;

impl RealTimeAction for CheckpointAction {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn begin(&mut self, scheduled_time: u64) {
        if scheduled_time != 0 {
            tracing::info!(at_unix = scheduled_time, "first checkpoint will occur around");
        }
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        let rank = ctx.rank();
        tracing::info!(
            rank = rank.rank,
            thread = rank.thread,
            simulated_time = ctx.elapsed_sim_time(),
            "creating checkpoint"
        );
        ctx.schedule_checkpoint();
    }

    fn can_initiate_checkpoint(&self) -> bool {
        true
    }
}

/// State shared by every thread's heartbeat action in one process.
pub struct HeartbeatShared {
    barrier: Barrier,
    max_tv_depth: AtomicU64,
}

impl HeartbeatShared {
    /// Create shared state for `num_threads` heartbeat instances.
    #[must_use]
    pub fn new(num_threads: usize) -> Arc<Self> {
        Arc::new(Self {
            barrier: Barrier::new(num_threads),
            max_tv_depth: AtomicU64::new(0),
        })
    }
}

/// Heartbeat: aggregate and print per-rank memory, activity, queue-depth,
/// and sync-buffer numbers.
///
/// Threads agree on the deepest event queue through a shared atomic updated
/// between two barriers; ranks reduce with one collective each (max and
/// sum); only rank 0 / thread 0 prints.
pub struct HeartbeatAction {
    shared: Arc<HeartbeatShared>,
    last_time: f64,
}

impl HeartbeatAction {
    /// Create one thread's heartbeat instance.
    #[must_use]
    pub fn new(shared: Arc<HeartbeatShared>) -> Self {
        Self {
            shared,
            last_time: 0.0,
        }
    }

    fn cpu_seconds() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RealTimeAction for HeartbeatAction {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn begin(&mut self, _scheduled_time: u64) {
        self.last_time = Self::cpu_seconds();
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        let rank = ctx.rank();
        let num_ranks = ctx.num_ranks();
        let stats = ctx.heartbeat_stats();

        if rank.thread == 0 && rank.rank == 0 {
            let now = Self::cpu_seconds();
            tracing::info!(
                simulated_time = ctx.elapsed_sim_time(),
                wall_seconds_since_last = format!("{:.5}", now - self.last_time),
                "simulation heartbeat"
            );
            self.last_time = now;
        }
        if rank.thread == 0 {
            self.shared
                .max_tv_depth
                .store(stats.timevortex_depth, Ordering::SeqCst);
        }

        if num_ranks.thread > 1 {
            // Ensure the seed store is visible, fold every thread's depth
            // in, then wait until all updates are done.
            self.shared.barrier.wait();
            if rank.thread != 0 {
                self.shared
                    .max_tv_depth
                    .fetch_max(stats.timevortex_depth, Ordering::SeqCst);
            }
            self.shared.barrier.wait();
        }

        if rank.thread != 0 {
            return;
        }
        let local_depth = self.shared.max_tv_depth.load(Ordering::SeqCst);

        let (global_max_depth, max_sync, sum_sync, max_mempool, sum_mempool, sum_activities) =
            match ctx.transport() {
                Some(transport) if num_ranks.rank > 1 => {
                    let depth = transport.allreduce_max(local_depth).unwrap_or(local_depth);
                    let max_sync = transport
                        .allreduce_max(stats.sync_data_size)
                        .unwrap_or(stats.sync_data_size);
                    let sum_sync = transport
                        .allreduce_sum(stats.sync_data_size)
                        .unwrap_or(stats.sync_data_size);
                    let max_mem = transport
                        .allreduce_max(stats.mempool_bytes.max(0) as u64)
                        .unwrap_or(0);
                    let sum_mem = transport
                        .allreduce_sum(stats.mempool_bytes.max(0) as u64)
                        .unwrap_or(0);
                    let sum_act = transport
                        .allreduce_sum(stats.active_activities.max(0) as u64)
                        .unwrap_or(0);
                    (depth, max_sync, sum_sync, max_mem, sum_mem, sum_act)
                }
                _ => (
                    local_depth,
                    0,
                    0,
                    stats.mempool_bytes.max(0) as u64,
                    stats.mempool_bytes.max(0) as u64,
                    stats.active_activities.max(0) as u64,
                ),
            };

        if rank.rank == 0 {
            tracing::info!(
                max_mempool = UnitValue::bytes(max_mempool as f64).to_string_best_si(),
                global_mempool = UnitValue::bytes(sum_mempool as f64).to_string_best_si(),
                global_active_activities = sum_activities,
                max_timevortex_depth = global_max_depth,
                "heartbeat resource usage"
            );
            if num_ranks.rank > 1 {
                tracing::info!(
                    max_sync_data = UnitValue::bytes(max_sync as f64).to_string_best_si(),
                    global_sync_data = UnitValue::bytes(sum_sync as f64).to_string_best_si(),
                    "heartbeat sync usage"
                );
            }
        }
    }
}
