//! Link configuration.
//!
//! A link is a bidirectional connection between two component ports with a
//! send-side latency on each end. Several link fields change meaning when
//! the graph moves from construction to simulation; those are modeled as
//! explicit two-state types with a single finalize transition rather than
//! in-place reinterpretation:
//!
//! - [`LinkLatency`]: an interned latency-string index while building, a
//!   cycle count once resolved against the time base.
//! - [`LinkOrder`]: a reference count while building, the deterministic
//!   delivery-order tag afterwards.
//!
//! Latency strings are interned in a process-wide table so that the O(links)
//! string-to-cycles conversion happens once per distinct string, not once
//! per link.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use serde::{Deserialize, Serialize};
use sim_model::ids::{ComponentId, LinkId};
use sim_model::svmap::MapKey;
use sim_model::time::{SimTime, TimeBase, TimeError};
use sim_model::RankInfo;

// ---------------------------------------------------------------------------
// Latency string interning
// ---------------------------------------------------------------------------

struct LatencyTable {
    map: HashMap<String, u32>,
    reverse: Vec<String>,
}

/// Index 0 is reserved so an index of zero always means "no latency set".
static LATENCY_TABLE: LazyLock<Mutex<LatencyTable>> = LazyLock::new(|| {
    Mutex::new(LatencyTable {
        map: HashMap::new(),
        reverse: vec![String::new()],
    })
});

/// Intern a latency string, returning its positive index.
pub fn latency_index(latency: &str) -> u32 {
    let mut table = LATENCY_TABLE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(&idx) = table.map.get(latency) {
        return idx;
    }
    let idx = table.reverse.len() as u32;
    table.map.insert(latency.to_string(), idx);
    table.reverse.push(latency.to_string());
    idx
}

/// The interned string for an index.
#[must_use]
pub fn latency_string(index: u32) -> String {
    let table = LATENCY_TABLE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    table
        .reverse
        .get(index as usize)
        .cloned()
        .unwrap_or_default()
}

/// Convert every interned latency string to cycles through the time base.
///
/// Entry 0 of the returned vector is zero (the "unset" index).
///
/// # Errors
///
/// Propagates the first string that fails unit parsing.
pub fn resolve_latency_vector(tb: &TimeBase) -> Result<Vec<SimTime>, TimeError> {
    let table = LATENCY_TABLE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut vec = Vec::with_capacity(table.reverse.len());
    vec.push(0);
    for s in &table.reverse[1..] {
        vec.push(tb.sim_cycles(s)?);
    }
    Ok(vec)
}

// ---------------------------------------------------------------------------
// Two-state link fields
// ---------------------------------------------------------------------------

/// Send-side latency of one link end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LinkLatency {
    /// No latency recorded yet.
    #[default]
    Unset,
    /// Index into the process-wide latency-string table (construction).
    Pending(u32),
    /// Cycle count (after `post_creation_cleanup`).
    Resolved(SimTime),
}

impl LinkLatency {
    /// Cycle count once resolved; zero beforehand.
    #[must_use]
    pub fn cycles(&self) -> SimTime {
        match self {
            LinkLatency::Resolved(c) => *c,
            _ => 0,
        }
    }

    /// Returns `true` if a latency has been recorded (in either state).
    #[must_use]
    pub fn is_set(&self) -> bool {
        !matches!(self, LinkLatency::Unset)
    }
}

/// Connection count while building; delivery-order tag once finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkOrder {
    /// Number of components currently attached (0, 1, or 2).
    Building(u8),
    /// Deterministic delivery tag, assigned alphabetically by link name.
    Final(u32),
}

impl Default for LinkOrder {
    fn default() -> Self {
        LinkOrder::Building(0)
    }
}

/// One side of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LinkEnd {
    /// The attached component, if any.
    pub component: Option<ComponentId>,
    /// The port the link connects to on that component.
    pub port: String,
    /// Send-side latency for events inserted on this side.
    pub latency: LinkLatency,
}

/// Configuration of one link.
///
/// Link names matter in three places: error reporting, the alphabetic
/// assignment of delivery-order tags, and the matching of cross-partition
/// link halves during a parallel load. They are discarded after elaboration;
/// only the order tag survives into the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigLink {
    /// Link id, unique within this rank only.
    pub id: LinkId,
    /// Link name.
    pub name: String,
    /// The two sides, filled in attachment order.
    pub ends: [LinkEnd; 2],
    /// For a non-local link, the (rank, thread) of the remote side. The
    /// local side always lives at index 0 of `ends`.
    pub remote: Option<RankInfo>,
    /// The partitioner is forbidden to cut this link.
    pub no_cut: bool,
    /// Set by rank checking when the endpoints land on different ranks.
    pub cross_rank: bool,
    /// Set by rank checking when the endpoints share a rank but not a
    /// thread.
    pub cross_thread: bool,
    /// Reference count, then delivery-order tag.
    pub order: LinkOrder,
}

impl ConfigLink {
    /// Create an unconnected link.
    #[must_use]
    pub fn new(id: LinkId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            ends: [LinkEnd::default(), LinkEnd::default()],
            remote: None,
            no_cut: false,
            cross_rank: false,
            cross_thread: false,
            order: LinkOrder::default(),
        }
    }

    /// Number of components attached so far.
    #[must_use]
    pub fn connection_count(&self) -> u8 {
        match self.order {
            LinkOrder::Building(n) => n,
            LinkOrder::Final(_) => 2,
        }
    }

    /// The delivery-order tag; zero before finalization.
    #[must_use]
    pub fn order_tag(&self) -> u32 {
        match self.order {
            LinkOrder::Final(tag) => tag,
            LinkOrder::Building(_) => 0,
        }
    }

    /// Returns `true` if one side of this link is on another partition.
    #[must_use]
    pub fn is_nonlocal(&self) -> bool {
        self.remote.is_some()
    }

    /// Minimum latency across both sides. For a non-local link only the
    /// local side is meaningful.
    #[must_use]
    pub fn min_latency(&self) -> SimTime {
        if self.is_nonlocal() {
            return self.ends[0].latency.cycles();
        }
        self.ends[0].latency.cycles().min(self.ends[1].latency.cycles())
    }

    /// Mark the link non-local.
    ///
    /// `which_local` names the side holding the local component before the
    /// call; afterwards the local information is always at index 0 and the
    /// remote placement is recorded explicitly.
    pub fn set_nonlocal(&mut self, which_local: usize, remote: RankInfo) {
        if which_local == 1 {
            self.ends.swap(0, 1);
        }
        self.ends[1] = LinkEnd::default();
        self.remote = Some(remote);
    }

    /// Resolve any pending latency indices to cycle counts.
    pub(crate) fn resolve_latencies(&mut self, resolved: &[SimTime]) {
        for end in &mut self.ends {
            if let LinkLatency::Pending(idx) = end.latency {
                end.latency = LinkLatency::Resolved(resolved[idx as usize]);
            }
        }
    }

    /// Human-readable latency of one side, in either state.
    #[must_use]
    pub fn latency_display(&self, side: usize, tb: Option<&TimeBase>) -> String {
        match self.ends[side].latency {
            LinkLatency::Unset => String::new(),
            LinkLatency::Pending(idx) => latency_string(idx),
            LinkLatency::Resolved(cycles) => match tb {
                Some(tb) => tb.format_cycles(cycles),
                None => format!("{cycles} cycles"),
            },
        }
    }
}

impl MapKey for ConfigLink {
    type Key = LinkId;
    fn key(&self) -> LinkId {
        self.id
    }
}
