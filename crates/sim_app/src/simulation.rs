//! Simulation harness.
//!
//! Drives the startup data flow - model load, structural validation,
//! partitioning, per-rank split - and then runs one event loop per thread.
//! Threads advance cooperatively to the next sync horizon, exchange
//! cross-partition traffic and signals there, and honor checkpoint
//! boundaries and signal-driven shutdown. Component logic is external; the
//! loop schedules whatever activities reach the queues.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use sim_graph::model::load_json_model;
use sim_graph::{ConfigGraph, ElementRegistry};
use sim_model::time::{SimTime, TimeBase, MAX_SIM_TIME};
use sim_model::RankInfo;
use sim_net::messages::HeartbeatStats;
use sim_net::nats::NatsTransport;
use sim_net::Transport;
use sim_part::PartitionerRegistry;
use sim_realtime::signals::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use sim_realtime::{
    AlarmShared, CheckpointAction, ComponentStatusAction, CoreStatusAction, ExitEmergencyAction,
    HeartbeatAction, HeartbeatShared, RealTimeAction, RealTimeManager, SimStatus,
};
use sim_sync::{BinaryHeapTimeVortex, SyncManager, SyncShared, TimeVortex};

use crate::checkpoint::{self, CheckpointRequest, CheckpointSchedule};
use crate::config::Config;

/// Everything elaboration produces for the run.
pub struct Elaboration {
    /// This rank's configuration graph.
    pub graph: ConfigGraph,
    /// Minimum cross-rank partition latency.
    pub min_part: SimTime,
    /// Latencies of this rank's cross-thread links.
    pub interthread_latencies: Vec<SimTime>,
    /// The core time base.
    pub timebase: TimeBase,
    /// Program options carried by the model file.
    pub program_options: BTreeMap<String, String>,
}

/// Build, validate, partition, and split the graph for this rank.
///
/// # Errors
///
/// Fatal on model, validation, partitioner, or checkpoint errors.
pub fn elaborate(config: &mut Config, registry: &ElementRegistry) -> Result<Elaboration> {
    let model_path = config
        .model
        .clone()
        .context("a model file (or checkpoint manifest) is required")?;

    if config.load_checkpoint {
        let (globals, graph) = checkpoint::load_checkpoint(&model_path, config)?;
        let timebase = globals
            .min_part_timebase
            .clone()
            .map_or_else(|| TimeBase::new(&config.timebase), Ok)?;
        tracing::info!(
            sim_cycle = globals.current_sim_cycle,
            ranks = %globals.ranks,
            "restarting from checkpoint"
        );
        // The restored links already carry resolved latencies and cross
        // flags, so the thread window falls straight out of them.
        let interthread_latencies = graph
            .links()
            .iter()
            .filter(|l| l.cross_thread)
            .map(sim_graph::ConfigLink::min_latency)
            .collect();
        return Ok(Elaboration {
            min_part: globals.min_part,
            graph,
            interthread_latencies,
            timebase,
            program_options: BTreeMap::new(),
        });
    }

    let text = std::fs::read_to_string(&model_path)
        .with_context(|| format!("reading model {}", model_path.display()))?;
    let model = load_json_model(&text)?;
    config.apply_model_options(&model.program_options);

    let timebase = TimeBase::new(&config.timebase)?;
    let mut graph = model.graph;
    graph.post_creation_cleanup(&timebase)?;
    graph.check_structural_errors(registry)?;

    let world = config.world();
    let partitioners = PartitionerRegistry::with_builtins();
    let partitioner = partitioners.create(
        &config.partitioner,
        world,
        RankInfo::new(config.my_rank, 0),
        config.verbose,
    )?;
    if partitioner.requires_config_graph() {
        partitioner.partition_config_graph(&mut graph)?;
    } else {
        let mut pgraph = graph.collapsed_partition_graph();
        partitioner.partition_graph(&mut pgraph)?;
        graph.annotate_ranks(&pgraph);
    }
    graph.check_ranks(world)?;

    if config.output_partition {
        for comp in graph.components().iter() {
            tracing::info!(component = comp.name, rank = %comp.rank, "partition assignment");
        }
    }
    if let Some(path) = &config.output_json {
        std::fs::write(path, sim_graph::output::write_json(&graph, &model.program_options)?)?;
    }
    if let Some(path) = &config.output_xml {
        std::fs::write(path, sim_graph::output::write_xml(&graph))?;
    }
    if let Some(path) = &config.output_dot {
        std::fs::write(
            path,
            sim_graph::output::write_dot(&graph, world, config.dot_verbosity),
        )?;
    }

    // Global numbers come off the full graph; the split below keeps only
    // this rank's entities.
    let min_part = graph.minimum_partition_latency();
    let interthread_latencies: Vec<SimTime> = if config.no_interthread_links {
        Vec::new()
    } else {
        graph
            .links()
            .iter()
            .filter(|l| l.cross_thread)
            .map(sim_graph::ConfigLink::min_latency)
            .collect()
    };

    if world.rank > 1 {
        graph.reduce_to_single_rank(config.my_rank)?;
    }

    Ok(Elaboration {
        graph,
        min_part,
        interthread_latencies,
        timebase,
        program_options: model.program_options,
    })
}

/// The per-thread simulation state real-time actions act on.
struct SimState {
    my: RankInfo,
    world: RankInfo,
    timebase: TimeBase,
    transport: Option<Arc<dyn Transport>>,
    current: SimTime,
    shutdown: Option<bool>,
    checkpoint_requested: bool,
    tv_depth: u64,
    tv_max_depth: u64,
    sync_data_size: u64,
}

impl SimStatus for SimState {
    fn rank(&self) -> RankInfo {
        self.my
    }

    fn num_ranks(&self) -> RankInfo {
        self.world
    }

    fn elapsed_sim_time(&self) -> String {
        self.timebase.format_cycles(self.current)
    }

    fn heartbeat_stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            mempool_bytes: 0,
            active_activities: self.tv_depth as i64,
            timevortex_depth: self.tv_max_depth,
            sync_data_size: self.sync_data_size,
        }
    }

    fn print_status(&mut self, component_status: bool) {
        tracing::info!(
            rank = %self.my,
            simulated_time = self.elapsed_sim_time(),
            queue_depth = self.tv_depth,
            "scheduler status"
        );
        if component_status {
            // Component delegation belongs to the element layer; the core
            // reports only its own numbers here.
            tracing::info!(rank = %self.my, "component status requested");
        }
    }

    fn signal_shutdown(&mut self, abnormal: bool) {
        self.shutdown = Some(abnormal);
    }

    fn schedule_checkpoint(&mut self) {
        self.checkpoint_requested = true;
    }

    fn transport(&self) -> Option<&dyn Transport> {
        self.transport.as_deref()
    }
}

struct ThreadParams {
    config: Config,
    graph: Arc<ConfigGraph>,
    my: RankInfo,
    world: RankInfo,
    min_part: SimTime,
    interthread_latencies: Vec<SimTime>,
    timebase: TimeBase,
    stop_at: SimTime,
    transport: Option<Arc<dyn Transport>>,
    sync_shared: Arc<SyncShared>,
    alarm_shared: Arc<AlarmShared>,
    heartbeat_shared: Arc<HeartbeatShared>,
    checkpoint_dir: Option<PathBuf>,
}

/// Run the whole simulation for this process.
///
/// # Errors
///
/// Fatal on elaboration, transport, or I/O failures; a signal-driven
/// emergency shutdown also reports as an error.
pub fn run(mut config: Config) -> Result<()> {
    let registry = ElementRegistry::new();
    let elaboration = elaborate(&mut config, &registry)?;
    let world = config.world();
    let my_rank = config.my_rank;

    let transport: Option<Arc<dyn Transport>> = if world.rank > 1 {
        let url = config
            .nats_url
            .clone()
            .unwrap_or_else(|| "nats://localhost:4222".to_string());
        let run_id = match &config.run_id {
            Some(id) => id.clone(),
            None => bail!("--run-id is required for multi-rank runs (all ranks must share it)"),
        };
        Some(Arc::new(NatsTransport::connect(
            &url, &run_id, my_rank, world.rank,
        )?))
    } else {
        None
    };

    let stop_at = match &config.stop_at {
        Some(s) => elaboration.timebase.sim_cycles(s)?,
        None => MAX_SIM_TIME,
    };

    sim_realtime::signals::install_signal_handlers()?;

    // Checkpoint infrastructure only exists when something can trigger one.
    let checkpoint_sim_period = match &config.checkpoint_sim_period {
        Some(s) => Some(elaboration.timebase.sim_cycles(s)?),
        None => None,
    };
    let can_checkpoint = checkpoint_sim_period.is_some() || config.checkpoint_wall_period > 0;
    let checkpoint_dir = if can_checkpoint {
        Some(checkpoint::create_unique_directory(&PathBuf::from(
            &config.checkpoint_prefix,
        ))?)
    } else {
        None
    };

    let sync_shared = SyncShared::new(my_rank, world, transport.clone());
    let alarm_shared = AlarmShared::new(world.thread as usize);
    let heartbeat_shared = HeartbeatShared::new(world.thread as usize);
    let graph = Arc::new(elaboration.graph);

    let start = std::time::Instant::now();
    let mut handles = Vec::new();
    for thread in 0..world.thread {
        let params = ThreadParams {
            config: config.clone(),
            graph: Arc::clone(&graph),
            my: RankInfo::new(my_rank, thread),
            world,
            min_part: elaboration.min_part,
            interthread_latencies: elaboration.interthread_latencies.clone(),
            timebase: elaboration.timebase.clone(),
            stop_at,
            transport: transport.clone(),
            sync_shared: Arc::clone(&sync_shared),
            alarm_shared: Arc::clone(&alarm_shared),
            heartbeat_shared: Arc::clone(&heartbeat_shared),
            checkpoint_dir: checkpoint_dir.clone(),
        };
        handles.push(
            std::thread::Builder::new()
                .name(format!("sim-worker-{thread}"))
                .spawn(move || run_thread(params, checkpoint_sim_period))?,
        );
    }

    let mut abnormal = false;
    for handle in handles {
        match handle.join() {
            Ok(Ok(thread_abnormal)) => abnormal |= thread_abnormal,
            Ok(Err(e)) => return Err(e),
            Err(_) => bail!("simulation worker panicked"),
        }
    }

    if config.timing_info {
        tracing::info!(
            wall_seconds = format!("{:.3}", start.elapsed().as_secs_f64()),
            simulated_time = elaboration.timebase.format_cycles(stop_at.min(MAX_SIM_TIME)),
            "run complete"
        );
    }
    if abnormal {
        bail!("simulation ended with an emergency shutdown");
    }
    Ok(())
}

/// One worker thread's event loop. Returns whether shutdown was abnormal.
fn run_thread(params: ThreadParams, checkpoint_sim_period: Option<SimTime>) -> Result<bool> {
    let ThreadParams {
        config,
        graph,
        my,
        world,
        min_part,
        interthread_latencies,
        timebase,
        stop_at,
        transport,
        sync_shared,
        alarm_shared,
        heartbeat_shared,
        checkpoint_dir,
    } = params;

    let mut vortex = BinaryHeapTimeVortex::new();
    let mut sync = SyncManager::new(my, world, min_part, &interthread_latencies, sync_shared);
    let mut realtime = RealTimeManager::new(my, world, alarm_shared);
    let mut schedule = CheckpointSchedule::new(checkpoint_sim_period);

    realtime.register_signal(SIGINT, Box::new(ExitEmergencyAction));
    realtime.register_signal(SIGTERM, Box::new(ExitEmergencyAction));
    realtime.register_signal(SIGUSR1, Box::new(CoreStatusAction));
    realtime.register_signal(SIGUSR2, Box::new(ComponentStatusAction));
    if config.heartbeat_wall_period > 0 {
        realtime.register_interval(
            config.heartbeat_wall_period,
            Box::new(HeartbeatAction::new(Arc::clone(&heartbeat_shared))),
        );
    }
    if config.checkpoint_wall_period > 0 {
        realtime.register_interval(config.checkpoint_wall_period, Box::new(CheckpointAction));
    }

    register_partition_links(&graph, my, &sync);
    sync.exchange_link_info()?;

    let heartbeat_sim_period = match &config.heartbeat_sim_period {
        Some(s) => Some(timebase.sim_cycles(s)?),
        None => None,
    };
    let mut sim_heartbeat = HeartbeatAction::new(heartbeat_shared);
    let mut next_heartbeat = heartbeat_sim_period.unwrap_or(MAX_SIM_TIME);

    let mut state = SimState {
        my,
        world,
        timebase: timebase.clone(),
        transport,
        current: graph
            .restart
            .as_ref()
            .map_or(0, |r| r.current_sim_cycle),
        shutdown: None,
        checkpoint_requested: false,
        tv_depth: 0,
        tv_max_depth: 0,
        sync_data_size: 0,
    };
    if let Some(restart) = &graph.restart {
        sync.set_restart_time(restart.current_sim_cycle);
    }

    realtime.begin();
    sync.exchange_untimed_data(&mut vortex)?;

    let parallel = world.total() > 1;
    loop {
        state.tv_depth = vortex.depth();
        state.tv_max_depth = vortex.max_depth();
        state.sync_data_size = sync.data_size();
        realtime.poll(&mut state);
        if state.shutdown.is_some() {
            break;
        }

        // Advance to the nearest of: the sync horizon, a checkpoint
        // boundary, the heartbeat boundary, the stop time.
        let target = sync
            .next_sync_time()
            .min(schedule.next_checkpoint_sim_time())
            .min(next_heartbeat)
            .min(stop_at);
        let target = if target == MAX_SIM_TIME { stop_at } else { target };
        if target == MAX_SIM_TIME && vortex.next_time().is_none() {
            // Nothing left to do and no bound to run to.
            break;
        }

        for activity in vortex.pop_until(target) {
            state.current = state.current.max(activity.time);
        }
        state.current = state.current.max(target.min(stop_at));

        let checkpoint_requested =
            std::mem::take(&mut state.checkpoint_requested) || schedule.check(state.current);

        let checkpoint_due = if parallel && sync.next_sync_time() <= target {
            let signals = realtime.take_signals();
            let outcome = sync.execute(
                state.current,
                &mut vortex,
                signals,
                checkpoint_requested,
                schedule.next_checkpoint_sim_time(),
            )?;
            if outcome.signals.any() {
                realtime.perform_signals(outcome.signals, &mut state);
            }
            outcome.checkpoint_due
        } else {
            checkpoint_requested
        };

        if checkpoint_due {
            if let Some(dir) = &checkpoint_dir {
                if my.thread == 0 {
                    checkpoint::write_checkpoint(
                        dir,
                        schedule.next_id(),
                        &config.checkpoint_prefix,
                        &CheckpointRequest {
                            config: &config,
                            graph: &graph,
                            world,
                            my_rank: my.rank,
                            current_sim_cycle: state.current,
                            min_part,
                            timebase: &timebase,
                        },
                    )?;
                }
            }
        }

        if state.current >= next_heartbeat {
            sim_heartbeat.execute(&mut state);
            if let Some(period) = heartbeat_sim_period {
                while next_heartbeat <= state.current {
                    next_heartbeat = next_heartbeat.saturating_add(period);
                }
            }
        }

        if state.shutdown.is_some() || state.current >= stop_at {
            break;
        }
    }

    sync.exchange_untimed_data(&mut vortex)?;
    tracing::info!(
        rank = %my,
        simulated_time = state.elapsed_sim_time(),
        "simulation thread finished"
    );
    Ok(state.shutdown == Some(true))
}

/// Register this thread's side of every cross-partition link with the sync
/// manager; the delivery tag is the link's order tag.
fn register_partition_links(graph: &Arc<ConfigGraph>, my: RankInfo, sync: &SyncManager) {
    for link in graph.links().iter() {
        let tag = u64::from(link.order_tag());
        if let Some(remote) = link.remote {
            // The local side lives at index 0 after the split.
            let local_thread = link.ends[0]
                .component
                .and_then(|c| graph.find_component(c.parent()))
                .map_or(0, |c| c.rank.thread);
            if local_thread == my.thread {
                let _target = sync.register_link(remote, &link.name, tag);
            }
        } else if link.cross_thread {
            for side in 0..2 {
                let Some(owner) = link.ends[side]
                    .component
                    .and_then(|c| graph.find_component(c.parent()))
                else {
                    continue;
                };
                let Some(peer) = link.ends[1 - side]
                    .component
                    .and_then(|c| graph.find_component(c.parent()))
                else {
                    continue;
                };
                if owner.rank.thread == my.thread {
                    let _target = sync.register_link(peer.rank, &link.name, tag);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    /// Serializes tests that run whole simulations (shared signal state).
    static TEST_DIR_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    const MODEL: &str = r#"{
        "program_options": { "stop-at": "1us" },
        "components": [
            { "name": "n0", "type": "test.node", "partition": { "rank": 0, "thread": 0 } },
            { "name": "n1", "type": "test.node", "partition": { "rank": 0, "thread": 0 } }
        ],
        "links": [
            {
                "name": "wire",
                "left":  { "component": "n0", "port": "out", "latency": "10ns" },
                "right": { "component": "n1", "port": "in", "latency": "10ns" }
            }
        ]
    }"#;

    fn write_model(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sim_app_model_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.json");
        std::fs::write(&path, MODEL).unwrap();
        path
    }

    #[test]
    fn test_elaborate_builds_and_validates() {
        let path = write_model("elab");
        let mut config = Config::parse_from(["sim_app", path.to_str().unwrap()]);
        let elaboration = elaborate(&mut config, &ElementRegistry::new()).unwrap();

        assert_eq!(elaboration.graph.num_components(), 2);
        // The model's program option filled in stop-at.
        assert_eq!(config.stop_at.as_deref(), Some("1us"));
        // Single rank: no cross-rank latency bound.
        assert_eq!(elaboration.min_part, MAX_SIM_TIME);
    }

    #[test]
    fn test_serial_run_to_stop_time() {
        let _guard = TEST_DIR_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let path = write_model("run");
        let config = Config::parse_from(["sim_app", path.to_str().unwrap()]);
        run(config).unwrap();
    }

    #[test]
    fn test_run_with_checkpoint_period_writes_checkpoint() {
        let _guard = TEST_DIR_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let path = write_model("ckpt");
        let dir = std::env::temp_dir().join(format!("sim_app_ckpt_out_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let prefix = dir.join("checkpoint");
        let config = Config::parse_from([
            "sim_app",
            path.to_str().unwrap(),
            "--checkpoint-sim-period",
            "500ns",
            "--checkpoint-prefix",
            prefix.to_str().unwrap(),
        ]);
        run(config).unwrap();

        // One checkpoint directory was produced with a readable manifest.
        let produced: Vec<_> = std::fs::read_dir(&prefix)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert!(!produced.is_empty());
        let manifest = produced[0].join("manifest");
        assert!(manifest.exists());

        let mut restart = Config::parse_from([
            "sim_app",
            manifest.to_str().unwrap(),
            "--load-checkpoint",
        ]);
        let (globals, graph) = checkpoint::load_checkpoint(&manifest, &mut restart).unwrap();
        assert_eq!(globals.ranks, RankInfo::new(1, 1));
        assert_eq!(graph.num_components(), 2);
    }
}
