//! Checkpoint model: the on-disk format and the restart loader.
//!
//! A checkpoint directory holds a manifest, one globals file, and one graph
//! file per rank. The manifest is line oriented; the loader locates the
//! globals file through the `** (globals): ` marker and each rank's graph
//! through `** (rank N): ` markers. Every binary section is framed as a
//! little-endian `u64` byte count followed by that many bytes of named
//! MessagePack.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sim_model::time::{SimTime, TimeBase, MAX_SIM_TIME};
use sim_model::RankInfo;

use crate::graph::ConfigGraph;

/// Marker prefix for the globals line of the manifest.
pub const GLOBALS_MARKER: &str = "** (globals): ";

/// Marker prefix for a rank graph line of the manifest.
#[must_use]
pub fn rank_marker(rank: u32) -> String {
    format!("** (rank {rank}): ")
}

/// Errors from checkpoint reading and writing.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// File I/O failed.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A section failed to serialize.
    #[error("checkpoint encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A section failed to deserialize.
    #[error("checkpoint decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The manifest has no globals marker.
    #[error("checkpoint manifest has no '{GLOBALS_MARKER}' line: {0}")]
    MissingGlobals(PathBuf),

    /// The manifest has no graph file for the requested rank.
    #[error("checkpoint manifest has no graph file for rank {0}")]
    MissingRankGraph(u32),

    /// A length-prefixed section ran past the end of the file.
    #[error("truncated checkpoint section in {0}")]
    TruncatedSection(PathBuf),

    /// The restart parallelism does not match the checkpoint.
    ///
    /// A restart must either match the checkpointed (rank, thread) counts
    /// exactly or collapse to a serial (1, 1) run; event-id uniqueness and
    /// the partitioning are baked into the checkpoint.
    #[error("rank or thread counts do not match checkpoint: checkpoint requires {required}, requested {requested}; serial restarts are also permitted")]
    ParallelismMismatch {
        /// World size recorded in the checkpoint.
        required: RankInfo,
        /// World size of the restarting run.
        requested: RankInfo,
    },
}

/// Run-global state stored beside the per-rank graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointGlobals {
    /// Opaque serialized front-end configuration, merged with the
    /// restart-time configuration by the caller.
    pub config_blob: Vec<u8>,
    /// (rank, thread) world size of the checkpointed run.
    pub ranks: RankInfo,
    /// Simulated time at checkpoint.
    pub current_sim_cycle: SimTime,
    /// Scheduler priority at checkpoint.
    pub current_priority: i32,
    /// Minimum cross-rank partition latency at checkpoint.
    pub min_part: SimTime,
    /// Time base latencies were resolved against.
    pub min_part_timebase: Option<TimeBase>,
    /// Highest event id issued before the checkpoint.
    pub max_event_id: u64,
    /// Element library names needed to reload plugins.
    pub lib_names: BTreeSet<String>,
    /// Serialized shared-object manager blob.
    pub shared_objects: Vec<u8>,
    /// Serialized statistics configuration blob.
    pub stats_config: Vec<u8>,
}

impl Default for CheckpointGlobals {
    fn default() -> Self {
        Self {
            config_blob: Vec::new(),
            ranks: RankInfo::new(1, 1),
            current_sim_cycle: 0,
            current_priority: 0,
            min_part: MAX_SIM_TIME,
            min_part_timebase: None,
            max_event_id: 0,
            lib_names: BTreeSet::new(),
            shared_objects: Vec::new(),
            stats_config: Vec::new(),
        }
    }
}

/// Frame one section: length prefix, then the bytes.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_section<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), CheckpointError> {
    w.write_all(&(bytes.len() as u64).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Read one length-prefixed section.
///
/// # Errors
///
/// [`CheckpointError::TruncatedSection`] when the file ends early.
pub fn read_section<R: Read>(r: &mut R, path: &Path) -> Result<Vec<u8>, CheckpointError> {
    let mut len_bytes = [0u8; 8];
    r.read_exact(&mut len_bytes)
        .map_err(|_| CheckpointError::TruncatedSection(path.to_path_buf()))?;
    let len = u64::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .map_err(|_| CheckpointError::TruncatedSection(path.to_path_buf()))?;
    Ok(buf)
}

/// Write the globals file: four sections (config blob, globals header,
/// shared-object blob, stats-config blob).
///
/// # Errors
///
/// Propagates I/O and encode failures.
pub fn write_globals(path: &Path, globals: &CheckpointGlobals) -> Result<(), CheckpointError> {
    #[derive(Serialize)]
    struct Header<'a> {
        ranks: RankInfo,
        current_sim_cycle: SimTime,
        current_priority: i32,
        min_part: SimTime,
        min_part_timebase: &'a Option<TimeBase>,
        max_event_id: u64,
        lib_names: &'a BTreeSet<String>,
    }

    let mut file = std::fs::File::create(path)?;
    write_section(&mut file, &globals.config_blob)?;
    let header = rmp_serde::to_vec_named(&Header {
        ranks: globals.ranks,
        current_sim_cycle: globals.current_sim_cycle,
        current_priority: globals.current_priority,
        min_part: globals.min_part,
        min_part_timebase: &globals.min_part_timebase,
        max_event_id: globals.max_event_id,
        lib_names: &globals.lib_names,
    })?;
    write_section(&mut file, &header)?;
    write_section(&mut file, &globals.shared_objects)?;
    write_section(&mut file, &globals.stats_config)?;
    Ok(())
}

/// Read the globals file back.
///
/// # Errors
///
/// Propagates I/O, truncation, and decode failures.
pub fn read_globals(path: &Path) -> Result<CheckpointGlobals, CheckpointError> {
    #[derive(Deserialize)]
    struct Header {
        ranks: RankInfo,
        current_sim_cycle: SimTime,
        current_priority: i32,
        min_part: SimTime,
        min_part_timebase: Option<TimeBase>,
        max_event_id: u64,
        lib_names: BTreeSet<String>,
    }

    let mut file = std::fs::File::open(path)?;
    let config_blob = read_section(&mut file, path)?;
    let header: Header = rmp_serde::from_slice(&read_section(&mut file, path)?)?;
    let shared_objects = read_section(&mut file, path)?;
    let stats_config = read_section(&mut file, path)?;

    Ok(CheckpointGlobals {
        config_blob,
        ranks: header.ranks,
        current_sim_cycle: header.current_sim_cycle,
        current_priority: header.current_priority,
        min_part: header.min_part,
        min_part_timebase: header.min_part_timebase,
        max_event_id: header.max_event_id,
        lib_names: header.lib_names,
        shared_objects,
        stats_config,
    })
}

/// Write one rank's graph file.
///
/// # Errors
///
/// Propagates I/O and encode failures.
pub fn write_rank_graph(path: &Path, graph: &ConfigGraph) -> Result<(), CheckpointError> {
    let mut file = std::fs::File::create(path)?;
    let bytes = rmp_serde::to_vec_named(graph)?;
    write_section(&mut file, &bytes)?;
    Ok(())
}

/// Read one rank's graph file. The component name index is rebuilt in a
/// single pass after unpacking.
///
/// # Errors
///
/// Propagates I/O, truncation, and decode failures.
pub fn read_rank_graph(path: &Path) -> Result<ConfigGraph, CheckpointError> {
    let mut file = std::fs::File::open(path)?;
    let bytes = read_section(&mut file, path)?;
    let mut graph: ConfigGraph = rmp_serde::from_slice(&bytes)?;
    graph.rebuild_name_index();
    Ok(graph)
}

/// A parsed checkpoint manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Directory the manifest lives in.
    pub directory: PathBuf,
    /// Path of the globals file.
    pub globals: PathBuf,
    /// (rank, graph file) pairs.
    pub rank_graphs: Vec<(u32, PathBuf)>,
}

impl Manifest {
    /// Parse a manifest file.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::MissingGlobals`] when no globals line is present.
    pub fn read(path: &Path) -> Result<Self, CheckpointError> {
        let directory = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let text = std::fs::read_to_string(path)?;

        let mut globals = None;
        let mut rank_graphs = Vec::new();
        for line in text.lines() {
            if let Some(name) = line.strip_prefix(GLOBALS_MARKER) {
                globals = Some(directory.join(name.trim()));
            } else if let Some(rest) = line.strip_prefix("** (rank ") {
                if let Some((rank, name)) = rest.split_once("): ") {
                    if let Ok(rank) = rank.trim().parse::<u32>() {
                        rank_graphs.push((rank, directory.join(name.trim())));
                    }
                }
            }
        }
        let globals = globals.ok_or_else(|| CheckpointError::MissingGlobals(path.to_path_buf()))?;
        Ok(Self {
            directory,
            globals,
            rank_graphs,
        })
    }

    /// Write a manifest naming the globals file and each rank graph.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    pub fn write(path: &Path, globals: &str, rank_graphs: &[(u32, String)]) -> Result<(), CheckpointError> {
        let mut out = String::new();
        out.push_str(GLOBALS_MARKER);
        out.push_str(globals);
        out.push('\n');
        for (rank, file) in rank_graphs {
            out.push_str(&rank_marker(*rank));
            out.push_str(file);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    /// The graph file for one rank.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::MissingRankGraph`] when the manifest has no entry.
    pub fn rank_graph(&self, rank: u32) -> Result<&Path, CheckpointError> {
        self.rank_graphs
            .iter()
            .find(|(r, _)| *r == rank)
            .map(|(_, p)| p.as_path())
            .ok_or(CheckpointError::MissingRankGraph(rank))
    }
}

/// Validate restart parallelism: exact match or a serial collapse.
///
/// # Errors
///
/// [`CheckpointError::ParallelismMismatch`] otherwise.
pub fn validate_parallelism(checkpoint: RankInfo, restart: RankInfo) -> Result<(), CheckpointError> {
    if restart == checkpoint || restart == RankInfo::new(1, 1) {
        return Ok(());
    }
    Err(CheckpointError::ParallelismMismatch {
        required: checkpoint,
        requested: restart,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RestartState;

    fn tmpdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sim_cpt_test_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_globals_roundtrip() {
        let dir = tmpdir("globals");
        let path = dir.join("globals.bin");

        let globals = CheckpointGlobals {
            config_blob: vec![1, 2, 3],
            ranks: RankInfo::new(2, 2),
            current_sim_cycle: 12345,
            current_priority: 7,
            min_part: 1000,
            min_part_timebase: Some(TimeBase::new("1ps").unwrap()),
            max_event_id: 99,
            lib_names: ["proc".to_string(), "mem".to_string()].into(),
            shared_objects: vec![9; 16],
            stats_config: vec![4; 8],
        };
        write_globals(&path, &globals).unwrap();
        let restored = read_globals(&path).unwrap();
        assert_eq!(restored, globals);
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tmpdir("manifest");
        let path = dir.join("manifest");
        Manifest::write(
            &path,
            "globals.bin",
            &[(0, "graph_0.bin".to_string()), (1, "graph_1.bin".to_string())],
        )
        .unwrap();

        let m = Manifest::read(&path).unwrap();
        assert!(m.globals.ends_with("globals.bin"));
        assert_eq!(m.rank_graphs.len(), 2);
        assert!(m.rank_graph(1).unwrap().ends_with("graph_1.bin"));
        assert!(m.rank_graph(5).is_err());
    }

    #[test]
    fn test_manifest_without_globals_rejected() {
        let dir = tmpdir("noglobals");
        let path = dir.join("manifest");
        std::fs::write(&path, "just a comment\n").unwrap();
        assert!(matches!(
            Manifest::read(&path),
            Err(CheckpointError::MissingGlobals(_))
        ));
    }

    #[test]
    fn test_rank_graph_roundtrip_restores_restart_state() {
        let dir = tmpdir("rankgraph");
        let path = dir.join("graph_0.bin");

        let mut g = ConfigGraph::new();
        g.add_component("c0", "t").unwrap();
        g.restart = Some(RestartState {
            ranks: RankInfo::new(2, 1),
            current_sim_cycle: 500,
            ..RestartState::default()
        });
        write_rank_graph(&path, &g).unwrap();

        let restored = read_rank_graph(&path).unwrap();
        assert_eq!(restored.num_components(), 1);
        assert!(restored.find_component_by_name("c0").is_some());
        assert_eq!(restored.restart.as_ref().unwrap().current_sim_cycle, 500);
    }

    #[test]
    fn test_parallelism_validation() {
        let cpt = RankInfo::new(4, 2);
        assert!(validate_parallelism(cpt, RankInfo::new(4, 2)).is_ok());
        assert!(validate_parallelism(cpt, RankInfo::new(1, 1)).is_ok());
        assert!(validate_parallelism(cpt, RankInfo::new(2, 2)).is_err());
        assert!(validate_parallelism(cpt, RankInfo::new(4, 1)).is_err());
    }
}
