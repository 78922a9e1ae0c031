//! Driver configuration.
//!
//! The command-line surface the core consumes, plus the environment
//! variables controlling element discovery. Model files may carry
//! `program_options` that fill in anything the command line left at its
//! default; checkpointed configuration merges the same way on restart.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Environment variable naming the element library search path.
pub const ELEMENT_PATH_ENV: &str = "SIM_ELEMENT_PATH";

/// Environment variable selecting immediate (rather than lazy) symbol
/// binding for element libraries.
pub const DL_BIND_NOW_ENV: &str = "SIM_DL_BIND_NOW";

/// Simulation driver configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "sim_app", about = "Parallel discrete-event simulation core")]
pub struct Config {
    /// Model description (JSON), or a checkpoint manifest with
    /// `--load-checkpoint`.
    pub model: Option<PathBuf>,

    /// Verbosity level.
    #[arg(long, default_value_t = 0)]
    pub verbose: u32,

    /// Simulated time to stop at (e.g. `100us`).
    #[arg(long)]
    pub stop_at: Option<String>,

    /// Core time base: the duration of one cycle.
    #[arg(long, default_value = "1ps")]
    pub timebase: String,

    /// Partitioner name (`single`, `roundrobin`, `simple`, `kway`).
    #[arg(long, default_value = "single")]
    pub partitioner: String,

    /// Print the partition assignment after partitioning.
    #[arg(long)]
    pub output_partition: bool,

    /// Heartbeat period in simulated time (e.g. `10ms`).
    #[arg(long)]
    pub heartbeat_sim_period: Option<String>,

    /// Heartbeat period in wall-clock seconds (0 = off).
    #[arg(long, default_value_t = 0)]
    pub heartbeat_wall_period: u32,

    /// Checkpoint period in simulated time (e.g. `1ms`).
    #[arg(long)]
    pub checkpoint_sim_period: Option<String>,

    /// Checkpoint period in wall-clock seconds (0 = off).
    #[arg(long, default_value_t = 0)]
    pub checkpoint_wall_period: u32,

    /// Base name for checkpoint directories.
    #[arg(long, default_value = "checkpoint")]
    pub checkpoint_prefix: String,

    /// Treat the model argument as a checkpoint manifest and restart.
    #[arg(long)]
    pub load_checkpoint: bool,

    /// Disable direct cross-thread links (forces them through the rank
    /// plane).
    #[arg(long)]
    pub no_interthread_links: bool,

    /// Print elapsed build/run timing at exit.
    #[arg(long)]
    pub timing_info: bool,

    /// Prefix for core output lines.
    #[arg(long, default_value = "SIM: ")]
    pub output_prefix: String,

    /// Dump the built graph as a JSON model.
    #[arg(long)]
    pub output_json: Option<PathBuf>,

    /// Dump the built graph as XML.
    #[arg(long)]
    pub output_xml: Option<PathBuf>,

    /// Dump the built graph as DOT.
    #[arg(long)]
    pub output_dot: Option<PathBuf>,

    /// DOT writer verbosity.
    #[arg(long, default_value_t = 10)]
    pub dot_verbosity: u32,

    /// Worker threads per rank.
    #[arg(long, default_value_t = 1)]
    pub num_threads: u32,

    /// Number of cluster ranks in the run.
    #[arg(long, default_value_t = 1)]
    pub num_ranks: u32,

    /// This process's rank.
    #[arg(long, default_value_t = 0)]
    pub my_rank: u32,

    /// NATS URL for multi-rank runs.
    #[arg(long)]
    pub nats_url: Option<String>,

    /// Run id shared by all ranks of one launch.
    #[arg(long)]
    pub run_id: Option<String>,
}

impl Config {
    /// World size as (ranks, threads).
    #[must_use]
    pub fn world(&self) -> sim_model::RankInfo {
        sim_model::RankInfo::new(self.num_ranks, self.num_threads)
    }

    /// The element library search path, from the environment.
    #[must_use]
    pub fn element_search_path() -> Option<String> {
        std::env::var(ELEMENT_PATH_ENV).ok()
    }

    /// Whether element libraries should bind symbols immediately.
    #[must_use]
    pub fn dl_bind_now() -> bool {
        std::env::var(DL_BIND_NOW_ENV).is_ok_and(|v| v != "0")
    }

    /// Fold in `program_options` from a model file. An option only applies
    /// where the command line left the default.
    pub fn apply_model_options(
        &mut self,
        options: &std::collections::BTreeMap<String, String>,
    ) {
        for (key, value) in options {
            match key.as_str() {
                "stop-at" if self.stop_at.is_none() => self.stop_at = Some(value.clone()),
                "timebase" if self.timebase == "1ps" => self.timebase = value.clone(),
                "partitioner" if self.partitioner == "single" => self.partitioner = value.clone(),
                "heartbeat-sim-period" if self.heartbeat_sim_period.is_none() => {
                    self.heartbeat_sim_period = Some(value.clone());
                }
                "checkpoint-sim-period" if self.checkpoint_sim_period.is_none() => {
                    self.checkpoint_sim_period = Some(value.clone());
                }
                other => {
                    tracing::debug!(option = other, value, "ignoring unhandled program option");
                }
            }
        }
    }

    /// Merge configuration restored from a checkpoint: command-line
    /// settings win, checkpointed values fill the gaps that must match the
    /// original run.
    pub fn merge_checkpoint_options(&mut self, checkpointed: &Config) {
        // The time base is baked into the resolved latencies.
        self.timebase = checkpointed.timebase.clone();
        if self.stop_at.is_none() {
            self.stop_at = checkpointed.stop_at.clone();
        }
        if self.heartbeat_sim_period.is_none() {
            self.heartbeat_sim_period = checkpointed.heartbeat_sim_period.clone();
        }
        if self.checkpoint_sim_period.is_none() {
            self.checkpoint_sim_period = checkpointed.checkpoint_sim_period.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> Config {
        Config::parse_from(["sim_app"])
    }

    #[test]
    fn test_defaults() {
        let cfg = default_config();
        assert_eq!(cfg.timebase, "1ps");
        assert_eq!(cfg.partitioner, "single");
        assert_eq!(cfg.world(), sim_model::RankInfo::new(1, 1));
        assert!(!cfg.load_checkpoint);
    }

    #[test]
    fn test_model_options_fill_defaults_only() {
        let mut cfg = default_config();
        cfg.stop_at = Some("5us".to_string());

        let mut options = std::collections::BTreeMap::new();
        options.insert("stop-at".to_string(), "100us".to_string());
        options.insert("timebase".to_string(), "1ns".to_string());
        cfg.apply_model_options(&options);

        // The command line's stop-at wins; the default timebase yields.
        assert_eq!(cfg.stop_at.as_deref(), Some("5us"));
        assert_eq!(cfg.timebase, "1ns");
    }

    #[test]
    fn test_checkpoint_merge_pins_timebase() {
        let mut cfg = default_config();
        cfg.timebase = "10ps".to_string();
        let mut cpt = default_config();
        cpt.timebase = "1ns".to_string();
        cpt.stop_at = Some("1ms".to_string());

        cfg.merge_checkpoint_options(&cpt);
        assert_eq!(cfg.timebase, "1ns");
        assert_eq!(cfg.stop_at.as_deref(), Some("1ms"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let cfg = default_config();
        let bytes = rmp_serde::to_vec_named(&cfg).unwrap();
        let restored: Config = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored.timebase, cfg.timebase);
        assert_eq!(restored.num_threads, cfg.num_threads);
    }
}
