//! Message types exchanged between ranks at synchronization horizons.
//!
//! All message types derive `Serialize` and `Deserialize` for MessagePack
//! transport. Event payloads are opaque bytes; the core routes them by the
//! delivery tag set when cross-partition links were registered.

use serde::{Deserialize, Serialize};
use sim_model::time::SimTime;
use sim_model::RankInfo;

// ── Timed event traffic ─────────────────────────────────────────────────────

/// One event crossing a partition boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Delivery time in simulated cycles.
    pub time: SimTime,
    /// Scheduler priority, the first tie-breaker at equal time.
    pub priority: u32,
    /// Link delivery-order tag, the second tie-breaker.
    pub order_tag: u32,
    /// Opaque tag identifying the destination link on the receiving side.
    pub delivery_tag: u64,
    /// Opaque event payload.
    pub payload: Vec<u8>,
}

/// A batch of events for one destination partition, in send order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Destination (rank, thread).
    pub dest: RankInfo,
    /// Events in the order they were sent.
    pub events: Vec<WireEvent>,
}

/// Everything one rank ships to another at one sync horizon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Per-destination-thread event batches.
    pub batches: Vec<EventBatch>,
    /// Untimed messages (setup/teardown), delivered outside simulated time.
    pub untimed: Vec<WireEvent>,
}

// ── Signals ─────────────────────────────────────────────────────────────────

/// The three signal numbers exchanged at sync horizons so every rank
/// observes the same signal set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet {
    /// Shutdown signal number (SIGINT/SIGTERM), or zero.
    pub end: i32,
    /// User signal number (SIGUSR1/SIGUSR2), or zero.
    pub usr: i32,
    /// Alarm signal number (SIGALRM), or zero.
    pub alrm: i32,
}

impl SignalSet {
    /// Returns `true` if any signal is pending.
    #[must_use]
    pub fn any(&self) -> bool {
        self.end != 0 || self.usr != 0 || self.alrm != 0
    }

    /// Fold another set in, keeping the maximum of each signal number. The
    /// reduction every rank applies at the horizon.
    #[must_use]
    pub fn merged_max(self, other: SignalSet) -> SignalSet {
        SignalSet {
            end: self.end.max(other.end),
            usr: self.usr.max(other.usr),
            alrm: self.alrm.max(other.alrm),
        }
    }

    /// Pack into a single reduction word: each signal number in one byte
    /// lane so one `max` reduction covers all three.
    #[must_use]
    pub fn pack(self) -> u64 {
        (self.end.clamp(0, 255) as u64) << 16
            | (self.usr.clamp(0, 255) as u64) << 8
            | self.alrm.clamp(0, 255) as u64
    }

    /// Unpack from a reduction word.
    #[must_use]
    pub fn unpack(word: u64) -> SignalSet {
        SignalSet {
            end: ((word >> 16) & 0xFF) as i32,
            usr: ((word >> 8) & 0xFF) as i32,
            alrm: (word & 0xFF) as i32,
        }
    }
}

// ── Link registration ───────────────────────────────────────────────────────

/// Delivery info for one named cross-partition link, exchanged so the
/// sending side can tag events for the receiver's dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Link name (cross-partition halves pair by name).
    pub name: String,
    /// The receiving side's opaque delivery tag.
    pub delivery_tag: u64,
}

/// All link delivery info one rank publishes to a peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkInfoExchange {
    /// Publishing rank.
    pub source: u32,
    /// Link delivery records.
    pub links: Vec<LinkInfo>,
}

// ── Heartbeat ───────────────────────────────────────────────────────────────

/// Per-rank resource numbers aggregated by the heartbeat action.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HeartbeatStats {
    /// Memory pool bytes in use.
    pub mempool_bytes: i64,
    /// Live activity count.
    pub active_activities: i64,
    /// Deepest event queue observed.
    pub timevortex_depth: u64,
    /// Bytes buffered for the next sync exchange.
    pub sync_data_size: u64,
}
