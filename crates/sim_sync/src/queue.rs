//! Buffered activity queue for one cross-partition direction.
//!
//! Send-side link insertions land here between horizons; the sync takes the
//! whole buffer at the exchange. Insertion order is preserved, which is
//! what carries per-link send order across the boundary.

use sim_model::RankInfo;

use crate::activity::Activity;

/// A buffer of activities bound for one remote partition.
#[derive(Debug, Default)]
pub struct SyncQueue {
    dest: RankInfo,
    activities: Vec<Activity>,
    byte_size: u64,
}

impl SyncQueue {
    /// Create a queue for one destination partition.
    #[must_use]
    pub fn new(dest: RankInfo) -> Self {
        Self {
            dest,
            activities: Vec::new(),
            byte_size: 0,
        }
    }

    /// The destination partition.
    #[must_use]
    pub fn dest(&self) -> RankInfo {
        self.dest
    }

    /// Append an activity, preserving send order.
    pub fn insert(&mut self, activity: Activity) {
        self.byte_size += activity.wire_size();
        self.activities.push(activity);
    }

    /// Number of buffered activities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Bytes buffered for the next exchange, for heartbeat reporting.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.byte_size
    }

    /// Take the buffered activities, clearing the queue.
    pub fn take(&mut self) -> Vec<Activity> {
        self.byte_size = 0;
        std::mem::take(&mut self.activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(seq: u64) -> Activity {
        Activity {
            time: 1,
            priority: 0,
            order_tag: 0,
            seq,
            delivery_tag: 0,
            payload: vec![0; 8],
        }
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut q = SyncQueue::new(RankInfo::new(1, 0));
        for seq in 0..4 {
            q.insert(act(seq));
        }
        let taken = q.take();
        let seqs: Vec<u64> = taken.iter().map(|a| a.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_data_size_resets_on_take() {
        let mut q = SyncQueue::new(RankInfo::new(0, 1));
        q.insert(act(0));
        assert!(q.data_size() > 0);
        q.take();
        assert_eq!(q.data_size(), 0);
    }
}
