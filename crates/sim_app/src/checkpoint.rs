//! Checkpoint creation and restart loading.
//!
//! A checkpoint is a directory holding a manifest, one globals file (the
//! configuration, world size, simulated time, library names, shared-object
//! blob, and statistics blob, each length-prefixed), and one graph file per
//! rank. Restart validates parallelism before anything is deserialized:
//! event-id uniqueness and the partitioning are baked into the files, so
//! only an exact (rank, thread) match or a serial collapse is accepted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sim_graph::model::restart::{
    read_globals, read_rank_graph, validate_parallelism, write_globals, write_rank_graph,
    CheckpointError, CheckpointGlobals, Manifest,
};
use sim_graph::{ConfigGraph, RestartState};
use sim_model::time::{SimTime, TimeBase, MAX_SIM_TIME};
use sim_model::RankInfo;

use crate::config::Config;

/// Create a directory named `base`, or `base_N` for the first free `N`
/// when it already exists.
///
/// # Errors
///
/// Propagates directory-creation failures.
pub fn create_unique_directory(base: &Path) -> std::io::Result<PathBuf> {
    if !base.exists() {
        std::fs::create_dir_all(base)?;
        return Ok(base.to_path_buf());
    }
    for n in 1.. {
        let candidate = PathBuf::from(format!("{}_{n}", base.display()));
        if !candidate.exists() {
            std::fs::create_dir_all(&candidate)?;
            return Ok(candidate);
        }
    }
    unreachable!("directory probe is unbounded")
}

/// Recurring checkpoint trigger: fires on a simulated-time period, on an
/// explicit request (wall-clock action or signal), or both.
pub struct CheckpointSchedule {
    period: Option<SimTime>,
    next_sim_time: SimTime,
    generate: bool,
    checkpoint_id: u32,
}

impl CheckpointSchedule {
    /// Create a schedule; `period` is the simulated-time interval, if any.
    #[must_use]
    pub fn new(period: Option<SimTime>) -> Self {
        Self {
            period,
            next_sim_time: period.unwrap_or(MAX_SIM_TIME),
            generate: false,
            checkpoint_id: 0,
        }
    }

    /// Request a checkpoint at the next check, regardless of the period.
    pub fn set_checkpoint(&mut self) {
        self.generate = true;
    }

    /// The next simulated time a periodic checkpoint is due.
    #[must_use]
    pub fn next_checkpoint_sim_time(&self) -> SimTime {
        self.next_sim_time
    }

    /// Whether a checkpoint should be generated at `current`. Advances the
    /// periodic schedule and clears any explicit request.
    pub fn check(&mut self, current: SimTime) -> bool {
        let mut due = std::mem::take(&mut self.generate);
        if current >= self.next_sim_time {
            due = true;
            if let Some(period) = self.period {
                while self.next_sim_time <= current {
                    self.next_sim_time = self.next_sim_time.saturating_add(period);
                }
            }
        }
        due
    }

    /// The id the next written checkpoint gets.
    pub fn next_id(&mut self) -> u32 {
        self.checkpoint_id += 1;
        self.checkpoint_id
    }
}

/// Everything needed to write one checkpoint.
pub struct CheckpointRequest<'a> {
    /// Driver configuration to embed.
    pub config: &'a Config,
    /// This rank's graph.
    pub graph: &'a ConfigGraph,
    /// World size.
    pub world: RankInfo,
    /// This process's rank.
    pub my_rank: u32,
    /// Simulated time of the checkpoint boundary.
    pub current_sim_cycle: SimTime,
    /// Minimum cross-rank partition latency.
    pub min_part: SimTime,
    /// The core time base.
    pub timebase: &'a TimeBase,
}

/// Write one checkpoint into a fresh subdirectory of `dir`. Rank 0 writes
/// the manifest and the globals file; every rank writes its own graph
/// file. Returns the manifest path.
///
/// # Errors
///
/// Propagates I/O and serialization failures.
pub fn write_checkpoint(
    dir: &Path,
    id: u32,
    prefix: &str,
    request: &CheckpointRequest<'_>,
) -> Result<PathBuf, CheckpointError> {
    // The prefix may arrive as a path; only its final component names files.
    let stem = Path::new(prefix)
        .file_name()
        .map_or_else(|| "checkpoint".to_string(), |s| s.to_string_lossy().into_owned());
    let subdir = dir.join(format!("{stem}_{id}_{}", request.current_sim_cycle));
    std::fs::create_dir_all(&subdir)?;

    let globals_name = format!("{stem}_globals.bin");
    let graph_name = |rank: u32| format!("{stem}_{rank}.bin");

    if request.my_rank == 0 {
        // Element libraries are named by the `library.class` types in use.
        let lib_names: BTreeSet<String> = request
            .graph
            .components()
            .iter()
            .filter_map(|c| c.kind.split('.').next().map(str::to_string))
            .collect();

        let globals = CheckpointGlobals {
            config_blob: rmp_serde::to_vec_named(request.config)?,
            ranks: request.world,
            current_sim_cycle: request.current_sim_cycle,
            current_priority: 0,
            min_part: request.min_part,
            min_part_timebase: Some(request.timebase.clone()),
            max_event_id: 0,
            lib_names,
            shared_objects: Vec::new(),
            stats_config: rmp_serde::to_vec_named(request.graph.stats_config())?,
        };
        write_globals(&subdir.join(&globals_name), &globals)?;

        let rank_graphs: Vec<(u32, String)> =
            (0..request.world.rank).map(|r| (r, graph_name(r))).collect();
        Manifest::write(&subdir.join("manifest"), &globals_name, &rank_graphs)?;
    }

    write_rank_graph(&subdir.join(graph_name(request.my_rank)), request.graph)?;
    tracing::info!(
        directory = %subdir.display(),
        id,
        sim_cycle = request.current_sim_cycle,
        "checkpoint written"
    );
    Ok(subdir.join("manifest"))
}

/// Load a checkpoint for a restart.
///
/// Reads the manifest and globals, merges the checkpointed configuration
/// into `config`, validates parallelism, and returns this rank's graph with
/// its restart state attached.
///
/// # Errors
///
/// [`CheckpointError::ParallelismMismatch`] when the restart world neither
/// matches the checkpoint nor collapses to serial; I/O and decode errors
/// otherwise.
pub fn load_checkpoint(
    manifest_path: &Path,
    config: &mut Config,
) -> Result<(CheckpointGlobals, ConfigGraph), CheckpointError> {
    let manifest = Manifest::read(manifest_path)?;
    let globals = read_globals(&manifest.globals)?;

    let checkpointed: Config = rmp_serde::from_slice(&globals.config_blob)?;
    config.merge_checkpoint_options(&checkpointed);

    validate_parallelism(globals.ranks, config.world())?;

    // A serial collapse reads every rank's graph; an exact match reads only
    // this rank's.
    let mut graph = if config.world() == RankInfo::new(1, 1) && globals.ranks != config.world() {
        let mut merged: Option<ConfigGraph> = None;
        for (_, path) in &manifest.rank_graphs {
            let g = read_rank_graph(path)?;
            merged = Some(match merged {
                None => g,
                Some(mut acc) => {
                    acc.absorb(g);
                    acc
                }
            });
        }
        merged.unwrap_or_default()
    } else {
        read_rank_graph(manifest.rank_graph(config.my_rank)?)?
    };

    graph.restart = Some(RestartState {
        ranks: globals.ranks,
        current_sim_cycle: globals.current_sim_cycle,
        current_priority: globals.current_priority,
        min_part: globals.min_part,
        min_part_timebase: globals.min_part_timebase.clone(),
        max_event_id: globals.max_event_id,
        lib_names: globals.lib_names.clone(),
        shared_objects: globals.shared_objects.clone(),
        stats_config: globals.stats_config.clone(),
    });
    Ok((globals, graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn tmpdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sim_app_cpt_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_graph() -> ConfigGraph {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "proc.core").unwrap();
        let c1 = g.add_component("c1", "mem.bank").unwrap();
        let l = g.create_link("wire", Some("10ns"));
        g.add_link(c0, l, "out", None).unwrap();
        g.add_link(c1, l, "in", None).unwrap();
        g.post_creation_cleanup(&TimeBase::new("1ps").unwrap()).unwrap();
        g
    }

    #[test]
    fn test_unique_directory_probing() {
        let dir = tmpdir("unique");
        let base = dir.join("ckpt");
        let first = create_unique_directory(&base).unwrap();
        let second = create_unique_directory(&base).unwrap();
        let third = create_unique_directory(&base).unwrap();
        assert_eq!(first, base);
        assert!(second.ends_with("ckpt_1"));
        assert!(third.ends_with("ckpt_2"));
    }

    #[test]
    fn test_schedule_period_and_explicit_trigger() {
        let mut sched = CheckpointSchedule::new(Some(100));
        assert!(!sched.check(50));
        assert!(sched.check(100));
        assert_eq!(sched.next_checkpoint_sim_time(), 200);

        sched.set_checkpoint();
        assert!(sched.check(150));
        assert!(!sched.check(150));
    }

    #[test]
    fn test_checkpoint_write_and_restart_roundtrip() {
        let dir = tmpdir("roundtrip");
        let config = Config::parse_from(["sim_app"]);
        let graph = sample_graph();
        let tb = TimeBase::new("1ps").unwrap();

        let manifest = write_checkpoint(
            &dir,
            1,
            "checkpoint",
            &CheckpointRequest {
                config: &config,
                graph: &graph,
                world: RankInfo::new(1, 1),
                my_rank: 0,
                current_sim_cycle: 12345,
                min_part: 10_000,
                timebase: &tb,
            },
        )
        .unwrap();

        let mut restart_config = Config::parse_from(["sim_app"]);
        let (globals, restored) = load_checkpoint(&manifest, &mut restart_config).unwrap();
        assert_eq!(globals.current_sim_cycle, 12345);
        assert_eq!(globals.min_part, 10_000);
        assert!(globals.lib_names.contains("proc"));
        assert!(globals.lib_names.contains("mem"));

        assert_eq!(restored.num_components(), 2);
        assert!(restored.find_component_by_name("c0").is_some());
        let rs = restored.restart.as_ref().unwrap();
        assert_eq!(rs.current_sim_cycle, 12345);
        assert_eq!(rs.min_part, 10_000);
    }

    #[test]
    fn test_restart_rejects_wrong_parallelism() {
        let dir = tmpdir("mismatch");
        let config = Config::parse_from(["sim_app", "--num-ranks", "4", "--num-threads", "2"]);
        let graph = sample_graph();
        let tb = TimeBase::new("1ps").unwrap();
        let manifest = write_checkpoint(
            &dir,
            1,
            "checkpoint",
            &CheckpointRequest {
                config: &config,
                graph: &graph,
                world: RankInfo::new(4, 2),
                my_rank: 0,
                current_sim_cycle: 1,
                min_part: 1,
                timebase: &tb,
            },
        )
        .unwrap();

        // (2, 2) neither matches (4, 2) nor is serial.
        let mut bad = Config::parse_from(["sim_app", "--num-ranks", "2", "--num-threads", "2"]);
        assert!(matches!(
            load_checkpoint(&manifest, &mut bad),
            Err(CheckpointError::ParallelismMismatch { .. })
        ));
    }
}
