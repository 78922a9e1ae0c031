//! Activities and the per-thread event queue interface.
//!
//! An [`Activity`] is one pending piece of work in simulated time. At equal
//! delivery time, activities order by priority, then by the delivery-order
//! tag of the link they arrived on, then by insertion sequence - the total
//! order every queue implementation must respect.
//!
//! The production event queue is external to this crate; [`TimeVortex`] is
//! its interface and [`BinaryHeapTimeVortex`] the minimal in-tree
//! implementation the harness and tests run on.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use sim_model::time::SimTime;
use sim_net::messages::WireEvent;

/// One pending activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Delivery time in simulated cycles.
    pub time: SimTime,
    /// Scheduler priority; lower runs first at equal time.
    pub priority: u32,
    /// Delivery-order tag of the link this activity arrived on; lower runs
    /// first at equal time and priority.
    pub order_tag: u32,
    /// Insertion sequence, the final stable tie-breaker.
    pub seq: u64,
    /// Opaque tag identifying the destination link on the receiving side.
    pub delivery_tag: u64,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Activity {
    /// The ordering key: (time, priority, order tag, sequence).
    #[must_use]
    pub fn key(&self) -> (SimTime, u32, u32, u64) {
        (self.time, self.priority, self.order_tag, self.seq)
    }

    /// Approximate wire footprint, used for sync data-size reporting.
    #[must_use]
    pub fn wire_size(&self) -> u64 {
        (std::mem::size_of::<Self>() + self.payload.len()) as u64
    }

    /// Convert to the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            time: self.time,
            priority: self.priority,
            order_tag: self.order_tag,
            delivery_tag: self.delivery_tag,
            payload: self.payload.clone(),
        }
    }

    /// Build from the wire representation, stamping a fresh sequence.
    #[must_use]
    pub fn from_wire(event: WireEvent, seq: u64) -> Self {
        Self {
            time: event.time,
            priority: event.priority,
            order_tag: event.order_tag,
            seq,
            delivery_tag: event.delivery_tag,
            payload: event.payload,
        }
    }
}

impl Ord for Activity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Activity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The per-thread priority queue of pending activities.
pub trait TimeVortex: Send {
    /// Insert an activity.
    fn insert(&mut self, activity: Activity);

    /// Delivery time of the earliest pending activity.
    fn next_time(&self) -> Option<SimTime>;

    /// Pop every activity with `time <= horizon`, in order.
    fn pop_until(&mut self, horizon: SimTime) -> Vec<Activity>;

    /// Current queue depth.
    fn depth(&self) -> u64;

    /// Deepest the queue has ever been.
    fn max_depth(&self) -> u64;
}

#[derive(Debug, PartialEq, Eq)]
struct Reverse(Activity);

impl Ord for Reverse {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for Reverse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Binary-heap implementation of [`TimeVortex`].
#[derive(Debug, Default)]
pub struct BinaryHeapTimeVortex {
    heap: BinaryHeap<Reverse>,
    max_depth: u64,
}

impl BinaryHeapTimeVortex {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeVortex for BinaryHeapTimeVortex {
    fn insert(&mut self, activity: Activity) {
        self.heap.push(Reverse(activity));
        self.max_depth = self.max_depth.max(self.heap.len() as u64);
    }

    fn next_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|r| r.0.time)
    }

    fn pop_until(&mut self, horizon: SimTime) -> Vec<Activity> {
        let mut out = Vec::new();
        while self.heap.peek().is_some_and(|r| r.0.time <= horizon) {
            if let Some(Reverse(a)) = self.heap.pop() {
                out.push(a);
            }
        }
        out
    }

    fn depth(&self) -> u64 {
        self.heap.len() as u64
    }

    fn max_depth(&self) -> u64 {
        self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(time: SimTime, priority: u32, order_tag: u32, seq: u64) -> Activity {
        Activity {
            time,
            priority,
            order_tag,
            seq,
            delivery_tag: 0,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_ordering_time_then_priority_then_tag() {
        let mut q = BinaryHeapTimeVortex::new();
        q.insert(act(10, 0, 2, 0));
        q.insert(act(10, 0, 1, 1));
        q.insert(act(10, 1, 0, 2));
        q.insert(act(5, 9, 9, 3));

        let order: Vec<(SimTime, u32, u32)> = q
            .pop_until(SimTime::MAX)
            .into_iter()
            .map(|a| (a.time, a.priority, a.order_tag))
            .collect();
        assert_eq!(order, vec![(5, 9, 9), (10, 0, 1), (10, 0, 2), (10, 1, 0)]);
    }

    #[test]
    fn test_pop_until_respects_horizon() {
        let mut q = BinaryHeapTimeVortex::new();
        q.insert(act(10, 0, 0, 0));
        q.insert(act(20, 0, 0, 1));
        let popped = q.pop_until(15);
        assert_eq!(popped.len(), 1);
        assert_eq!(q.next_time(), Some(20));
    }

    #[test]
    fn test_max_depth_tracks_high_water() {
        let mut q = BinaryHeapTimeVortex::new();
        for i in 0..5 {
            q.insert(act(i, 0, 0, i));
        }
        q.pop_until(SimTime::MAX);
        assert_eq!(q.depth(), 0);
        assert_eq!(q.max_depth(), 5);
    }

    #[test]
    fn test_wire_roundtrip_preserves_ordering_fields() {
        let a = act(7, 3, 9, 0);
        let restored = Activity::from_wire(a.to_wire(), 42);
        assert_eq!(restored.time, 7);
        assert_eq!(restored.priority, 3);
        assert_eq!(restored.order_tag, 9);
        assert_eq!(restored.seq, 42);
    }
}
