//! Intra-rank thread synchronization.
//!
//! Threads of one process exchange buffered activities through per-producer
//! queues and meet at a process-local barrier. Signals and the checkpoint
//! flag travel through shared atomics between two barrier crossings, so
//! every thread leaves the sync with the same view.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use sim_model::time::{SimTime, MAX_SIM_TIME};
use sim_model::RankInfo;
use sim_net::messages::SignalSet;

use crate::activity::{Activity, TimeVortex};
use crate::queue::SyncQueue;

/// State shared by every [`ThreadSync`] of one process.
pub struct ThreadSyncShared {
    num_threads: usize,
    /// `queues[from][to]`: the buffer thread `from` fills for thread `to`.
    queues: Vec<Vec<Arc<Mutex<SyncQueue>>>>,
    barrier: Barrier,
    signals: AtomicU64,
    checkpoint: AtomicBool,
    /// Scratch counters for the untimed-data quiesce loop.
    untimed_moved: AtomicU64,
    global_total: AtomicU64,
}

impl ThreadSyncShared {
    /// Create shared state for `num_threads` threads.
    #[must_use]
    pub fn new(num_threads: usize) -> Arc<Self> {
        let queues = (0..num_threads)
            .map(|_from| {
                (0..num_threads)
                    .map(|to| {
                        Arc::new(Mutex::new(SyncQueue::new(RankInfo::new(
                            RankInfo::UNASSIGNED,
                            to as u32,
                        ))))
                    })
                    .collect()
            })
            .collect();
        Arc::new(Self {
            num_threads,
            queues,
            barrier: Barrier::new(num_threads),
            signals: AtomicU64::new(0),
            checkpoint: AtomicBool::new(false),
            untimed_moved: AtomicU64::new(0),
            global_total: AtomicU64::new(0),
        })
    }

    /// Number of threads meeting at this barrier.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// The queue thread `from` uses to send to thread `to`.
    #[must_use]
    pub fn queue(&self, from: usize, to: usize) -> Arc<Mutex<SyncQueue>> {
        Arc::clone(&self.queues[from][to])
    }

    /// Wait for every thread of the process.
    pub fn barrier_wait(&self) {
        self.barrier.wait();
    }

    /// Publish a rank-level untimed/total count to the other threads.
    pub(crate) fn set_global_total(&self, total: u64) {
        self.global_total.store(total, Ordering::SeqCst);
    }

    /// Read the published rank-level total.
    pub(crate) fn global_total(&self) -> u64 {
        self.global_total.load(Ordering::SeqCst)
    }

    /// Add to this round's moved-message counter.
    pub(crate) fn add_untimed_moved(&self, count: u64) {
        self.untimed_moved.fetch_add(count, Ordering::SeqCst);
    }

    /// Take this round's moved-message counter.
    pub(crate) fn take_untimed_moved(&self) -> u64 {
        self.untimed_moved.swap(0, Ordering::SeqCst)
    }
}

/// One thread's view of the intra-rank sync.
pub struct ThreadSync {
    thread: usize,
    shared: Arc<ThreadSyncShared>,
    window: SimTime,
    next_sync_time: SimTime,
    recv_seq: u64,
}

impl ThreadSync {
    /// Create the sync for one thread. `window` is the minimum latency of
    /// the cross-thread links, bounding how far threads may drift apart.
    #[must_use]
    pub fn new(thread: usize, shared: Arc<ThreadSyncShared>, window: SimTime) -> Self {
        Self {
            thread,
            shared,
            window,
            next_sync_time: window,
            recv_seq: 0,
        }
    }

    /// This thread's index.
    #[must_use]
    pub fn thread(&self) -> usize {
        self.thread
    }

    /// The intra-rank sync window.
    #[must_use]
    pub fn window(&self) -> SimTime {
        self.window
    }

    /// The next horizon this sync wants to run at.
    #[must_use]
    pub fn next_sync_time(&self) -> SimTime {
        self.next_sync_time
    }

    /// Re-seat the horizon after a restart.
    pub fn set_restart_time(&mut self, time: SimTime) {
        self.next_sync_time = time.saturating_add(self.window);
    }

    /// Bytes this thread has buffered toward its peers.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        (0..self.shared.num_threads)
            .map(|to| {
                self.shared.queues[self.thread][to]
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .data_size()
            })
            .sum()
    }

    /// Pull every activity the other threads buffered for this one into the
    /// local queue. Returns the number moved.
    fn drain_inbound(&mut self, vortex: &mut dyn TimeVortex) -> u64 {
        let mut moved = 0;
        for from in 0..self.shared.num_threads {
            let taken = self.shared.queues[from][self.thread]
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            for activity in taken {
                let mut activity = activity;
                activity.seq = self.recv_seq;
                self.recv_seq += 1;
                vortex.insert(activity);
                moved += 1;
            }
        }
        moved
    }

    /// Run one thread sync at `current`: make the window's sends visible at
    /// every receiver and agree on signals and the checkpoint flag.
    pub fn execute(
        &mut self,
        current: SimTime,
        vortex: &mut dyn TimeVortex,
        signals: SignalSet,
        checkpoint: bool,
    ) -> (SignalSet, bool) {
        // All sends of the closing window are in their queues once every
        // thread arrives.
        self.shared.barrier_wait();

        self.shared
            .signals
            .fetch_max(signals.pack(), Ordering::SeqCst);
        if checkpoint {
            self.shared.checkpoint.store(true, Ordering::SeqCst);
        }
        self.drain_inbound(vortex);

        // All updates to the shared flags are done.
        self.shared.barrier_wait();

        let observed = SignalSet::unpack(self.shared.signals.load(Ordering::SeqCst));
        let checkpoint_due = self.shared.checkpoint.load(Ordering::SeqCst);

        // Thread 0 clears the flags before rejoining the next round.
        self.shared.barrier_wait();
        if self.thread == 0 {
            self.shared.signals.store(0, Ordering::SeqCst);
            self.shared.checkpoint.store(false, Ordering::SeqCst);
        }

        self.next_sync_time = current.saturating_add(self.window);
        (observed, checkpoint_due)
    }

    /// One round of the untimed-data quiesce loop: drain inbound untimed
    /// activities, count them across the process, and report the process
    /// total (the rank plane folds this into its own reduction).
    pub fn exchange_untimed(&mut self, vortex: &mut dyn TimeVortex) -> u64 {
        self.shared.barrier_wait();
        let moved = self.drain_inbound(vortex);
        self.shared.add_untimed_moved(moved);
        self.shared.barrier_wait();
        let total = self.shared.take_untimed_moved();
        // Only one thread's take sees the value; republish so all agree.
        if total != 0 {
            self.shared.set_global_total(total);
        }
        self.shared.barrier_wait();
        let agreed = self.shared.global_total();
        self.shared.barrier_wait();
        if self.thread == 0 {
            self.shared.set_global_total(0);
        }
        agreed
    }
}

impl Default for ThreadSync {
    fn default() -> Self {
        Self::new(0, ThreadSyncShared::new(1), MAX_SIM_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::BinaryHeapTimeVortex;

    fn act(time: SimTime, seq: u64) -> Activity {
        Activity {
            time,
            priority: 0,
            order_tag: 0,
            seq,
            delivery_tag: 0,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_window_exchange_between_two_threads() {
        let shared = ThreadSyncShared::new(2);
        let mut handles = Vec::new();
        for me in 0..2usize {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                let mut sync = ThreadSync::new(me, Arc::clone(&shared), 100);
                let mut vortex = BinaryHeapTimeVortex::new();

                // Each thread sends one activity to the other.
                let peer = 1 - me;
                shared
                    .queue(me, peer)
                    .lock()
                    .unwrap()
                    .insert(act(50, me as u64));

                let (signals, ckpt) =
                    sync.execute(0, &mut vortex, SignalSet::default(), false);
                assert!(!signals.any());
                assert!(!ckpt);

                // The peer's send is now visible locally.
                assert_eq!(vortex.depth(), 1);
                assert_eq!(sync.next_sync_time(), 100);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_signals_propagate_across_threads() {
        let shared = ThreadSyncShared::new(2);
        let mut handles = Vec::new();
        for me in 0..2usize {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                let mut sync = ThreadSync::new(me, shared, 100);
                let mut vortex = BinaryHeapTimeVortex::new();

                // Only thread 0 saw a user signal.
                let mine = if me == 0 {
                    SignalSet { end: 0, usr: 10, alrm: 0 }
                } else {
                    SignalSet::default()
                };
                let (observed, _) = sync.execute(0, &mut vortex, mine, me == 1);
                assert_eq!(observed.usr, 10);

                // Run a second window to prove the flags were cleared.
                let (observed, ckpt) =
                    sync.execute(100, &mut vortex, SignalSet::default(), false);
                assert!(!observed.any());
                assert!(!ckpt);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_untimed_loop_counts_until_quiet() {
        let shared = ThreadSyncShared::new(2);
        let mut handles = Vec::new();
        for me in 0..2usize {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                let mut sync = ThreadSync::new(me, Arc::clone(&shared), 100);
                let mut vortex = BinaryHeapTimeVortex::new();
                if me == 0 {
                    shared.queue(0, 1).lock().unwrap().insert(act(0, 0));
                }
                // First round moves one message on the process.
                assert_eq!(sync.exchange_untimed(&mut vortex), 1);
                // Second round is quiet.
                assert_eq!(sync.exchange_untimed(&mut vortex), 0);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
