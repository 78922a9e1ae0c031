//! The synchronization manager.
//!
//! One `SyncManager` runs on each thread as a recurring action on that
//! thread's event queue. It routes cross-partition link registrations to
//! the right plane, computes the next horizon as the nearer of the rank and
//! thread windows, and executes the due sync - a rank sync always
//! piggybacks a thread sync so the whole process leaves the horizon
//! coherent.

use std::sync::{Arc, Mutex};

use sim_model::time::{SimTime, MAX_SIM_TIME};
use sim_model::RankInfo;
use sim_net::messages::SignalSet;
use sim_net::Transport;

use crate::activity::{Activity, TimeVortex};
use crate::error::SyncError;
use crate::queue::SyncQueue;
use crate::rank::RankSync;
use crate::thread::{ThreadSync, ThreadSyncShared};

/// Which plane the next horizon belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// Inter-rank sync (collective across all ranks).
    Rank,
    /// Intra-rank thread sync.
    Thread,
}

/// What a sync produced: the coherent signal set and whether a checkpoint
/// is due at this horizon.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    /// Signals every partition observed at this horizon.
    pub signals: SignalSet,
    /// Whether the partitions agreed to checkpoint at this horizon.
    pub checkpoint_due: bool,
}

/// Where a link's send-side insertions go.
pub enum SendTarget {
    /// Same thread: straight into the local event queue.
    Direct,
    /// Cross-partition: into a sync-owned buffer.
    Queue(Arc<Mutex<SyncQueue>>),
}

/// Per-process state shared by every thread's `SyncManager`.
pub struct SyncShared {
    thread: Arc<ThreadSyncShared>,
    rank_sync: Mutex<RankSync>,
    transport: Option<Arc<dyn Transport>>,
    /// Per-thread inboxes the rank sync delivers into.
    inbound: Vec<Mutex<Vec<Activity>>>,
    /// Rank-level outcome of the current horizon, read by all threads.
    rank_outcome: Mutex<SyncOutcome>,
}

impl SyncShared {
    /// Create the shared state for one process.
    ///
    /// `transport` is required when the world spans more than one rank.
    #[must_use]
    pub fn new(my_rank: u32, world: RankInfo, transport: Option<Arc<dyn Transport>>) -> Arc<Self> {
        Arc::new(Self {
            thread: ThreadSyncShared::new(world.thread as usize),
            rank_sync: Mutex::new(RankSync::new(my_rank, world)),
            transport,
            inbound: (0..world.thread).map(|_| Mutex::new(Vec::new())).collect(),
            rank_outcome: Mutex::new(SyncOutcome::default()),
        })
    }

    /// The thread-plane shared state.
    #[must_use]
    pub fn thread_shared(&self) -> &Arc<ThreadSyncShared> {
        &self.thread
    }

    fn lock_rank_sync(&self) -> std::sync::MutexGuard<'_, RankSync> {
        self.rank_sync
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// One thread's synchronization manager.
pub struct SyncManager {
    my: RankInfo,
    world: RankInfo,
    min_part: SimTime,
    shared: Arc<SyncShared>,
    thread_sync: ThreadSync,
    next_sync_type: SyncType,
    next_sync_time: SimTime,
}

impl SyncManager {
    /// Create the manager for thread `my.thread` of rank `my.rank`.
    ///
    /// `min_part` bounds the rank window; `interthread_latencies` (the
    /// latencies of the cross-thread links on this rank) bound the thread
    /// window.
    #[must_use]
    pub fn new(
        my: RankInfo,
        world: RankInfo,
        min_part: SimTime,
        interthread_latencies: &[SimTime],
        shared: Arc<SyncShared>,
    ) -> Self {
        let window = interthread_latencies
            .iter()
            .copied()
            .min()
            .unwrap_or(MAX_SIM_TIME);
        let thread_sync = ThreadSync::new(my.thread as usize, Arc::clone(&shared.thread), window);
        let mut manager = Self {
            my,
            world,
            min_part,
            shared,
            thread_sync,
            next_sync_type: SyncType::Thread,
            next_sync_time: MAX_SIM_TIME,
        };
        manager.compute_next_insert(0, MAX_SIM_TIME);
        manager
    }

    /// The next horizon.
    #[must_use]
    pub fn next_sync_time(&self) -> SimTime {
        self.next_sync_time
    }

    /// The plane of the next horizon.
    #[must_use]
    pub fn next_sync_type(&self) -> SyncType {
        self.next_sync_type
    }

    /// Compute the next horizon: the nearer of the rank horizon (bounded by
    /// the minimum partition latency, pulled in to a pending checkpoint
    /// boundary) and the thread horizon.
    pub fn compute_next_insert(&mut self, current: SimTime, next_checkpoint: SimTime) {
        let rank_horizon = if self.world.rank > 1 {
            current.saturating_add(self.min_part).min(next_checkpoint)
        } else {
            MAX_SIM_TIME
        };
        let thread_horizon = if self.world.thread > 1 {
            current.saturating_add(self.thread_sync.window())
        } else {
            MAX_SIM_TIME
        };
        if rank_horizon <= thread_horizon {
            self.next_sync_type = SyncType::Rank;
            self.next_sync_time = rank_horizon;
        } else {
            self.next_sync_type = SyncType::Thread;
            self.next_sync_time = thread_horizon;
        }
    }

    /// Re-seat the horizons after a checkpoint restart.
    pub fn set_restart_time(&mut self, time: SimTime) {
        self.thread_sync.set_restart_time(time);
        self.shared
            .lock_rank_sync()
            .set_next_sync_time(time.saturating_add(self.min_part));
        self.compute_next_insert(time, MAX_SIM_TIME);
    }

    /// Route a cross-partition link registration.
    ///
    /// Inter-rank links get a rank-sync queue, intra-rank cross-thread
    /// links a thread-sync queue, intra-thread links go direct. The
    /// returned target is where the link's send side inserts.
    pub fn register_link(&self, to: RankInfo, name: &str, local_delivery_tag: u64) -> SendTarget {
        if to.rank != self.my.rank {
            SendTarget::Queue(
                self.shared
                    .lock_rank_sync()
                    .register_link(to, name, local_delivery_tag),
            )
        } else if to.thread != self.my.thread {
            SendTarget::Queue(
                self.shared
                    .thread
                    .queue(self.my.thread as usize, to.thread as usize),
            )
        } else {
            SendTarget::Direct
        }
    }

    /// Exchange link delivery info across ranks. Collective: every thread
    /// of every rank must call it once after registration.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub fn exchange_link_info(&self) -> Result<(), SyncError> {
        self.shared.thread.barrier_wait();
        if self.my.thread == 0 {
            if let Some(transport) = &self.shared.transport {
                self.shared
                    .lock_rank_sync()
                    .exchange_link_info(transport.as_ref())?;
            }
        }
        self.shared.thread.barrier_wait();
        Ok(())
    }

    /// The remote delivery tag a cross-rank link learned at the exchange.
    #[must_use]
    pub fn remote_tag(&self, name: &str) -> Option<u64> {
        self.shared.lock_rank_sync().remote_tag(name)
    }

    /// Bytes buffered for the next exchange (thread plane, plus the rank
    /// plane on thread 0).
    #[must_use]
    pub fn data_size(&self) -> u64 {
        let mut size = self.thread_sync.data_size();
        if self.my.thread == 0 {
            size += self.shared.lock_rank_sync().data_size();
        }
        size
    }

    /// Execute the due sync at `current`.
    ///
    /// `local_signals` is this process's pending signal set (collected by
    /// the real-time manager); `checkpoint_requested` asks the partitions
    /// to agree on a checkpoint at this horizon.
    ///
    /// # Errors
    ///
    /// Transport failures are fatal.
    pub fn execute(
        &mut self,
        current: SimTime,
        vortex: &mut dyn TimeVortex,
        local_signals: SignalSet,
        checkpoint_requested: bool,
        next_checkpoint: SimTime,
    ) -> Result<SyncOutcome, SyncError> {
        let outcome = match self.next_sync_type {
            SyncType::Thread => {
                let (signals, checkpoint_due) =
                    self.thread_sync
                        .execute(current, vortex, local_signals, checkpoint_requested);
                SyncOutcome {
                    signals,
                    checkpoint_due,
                }
            }
            SyncType::Rank => {
                // Everyone arrives before thread 0 runs the collective.
                self.shared.thread.barrier_wait();
                if self.my.thread == 0 {
                    if let Some(transport) = &self.shared.transport {
                        let observed = {
                            let inbound = &self.shared.inbound;
                            let mut deliver = |thread: u32, activity: Activity| {
                                inbound[thread as usize]
                                    .lock()
                                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                                    .push(activity);
                            };
                            self.shared.lock_rank_sync().execute(
                                current,
                                self.min_part,
                                transport.as_ref(),
                                local_signals,
                                &mut deliver,
                            )?
                        };
                        let agreed = transport.allreduce_max(u64::from(checkpoint_requested))? > 0;
                        *self
                            .shared
                            .rank_outcome
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner) = SyncOutcome {
                            signals: observed,
                            checkpoint_due: agreed,
                        };
                    }
                }
                self.shared.thread.barrier_wait();

                // Each thread claims its inbound events, then the piggyback
                // thread sync spreads the rank outcome process-wide.
                for activity in self.shared.inbound[self.my.thread as usize]
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .drain(..)
                {
                    vortex.insert(activity);
                }
                let rank_outcome = *self
                    .shared
                    .rank_outcome
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let (signals, checkpoint_due) = self.thread_sync.execute(
                    current,
                    vortex,
                    local_signals.merged_max(rank_outcome.signals),
                    checkpoint_requested || rank_outcome.checkpoint_due,
                );
                SyncOutcome {
                    signals,
                    checkpoint_due,
                }
            }
        };
        self.compute_next_insert(current, next_checkpoint);
        Ok(outcome)
    }

    /// Queue an untimed message toward a remote partition.
    pub fn send_untimed(&self, to: RankInfo, event: sim_net::messages::WireEvent) {
        if to.rank != self.my.rank {
            self.shared.lock_rank_sync().send_untimed(to, event);
        } else {
            self.shared
                .thread
                .queue(self.my.thread as usize, to.thread as usize)
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(Activity::from_wire(event, 0));
        }
    }

    /// Run the untimed-data quiesce loop: exchange queued untimed messages
    /// until the global outstanding count reaches zero. Used before
    /// simulation and at teardown.
    ///
    /// # Errors
    ///
    /// Transport failures are fatal.
    pub fn exchange_untimed_data(&mut self, vortex: &mut dyn TimeVortex) -> Result<(), SyncError> {
        loop {
            let process_moved = self.thread_sync.exchange_untimed(vortex);

            let total = if self.world.rank > 1 {
                self.shared.thread.barrier_wait();
                if self.my.thread == 0 {
                    if let Some(transport) = &self.shared.transport {
                        let rank_moved = {
                            let inbound = &self.shared.inbound;
                            let mut deliver = |thread: u32, activity: Activity| {
                                inbound[thread as usize]
                                    .lock()
                                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                                    .push(activity);
                            };
                            self.shared
                                .lock_rank_sync()
                                .exchange_untimed(transport.as_ref(), &mut deliver)?
                        };
                        let world_thread_moved = transport.allreduce_sum(process_moved)?;
                        self.shared
                            .thread
                            .set_global_total(rank_moved + world_thread_moved);
                    }
                }
                self.shared.thread.barrier_wait();
                for activity in self.shared.inbound[self.my.thread as usize]
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .drain(..)
                {
                    vortex.insert(activity);
                }
                let total = self.shared.thread.global_total();
                self.shared.thread.barrier_wait();
                if self.my.thread == 0 {
                    self.shared.thread.set_global_total(0);
                }
                total
            } else {
                process_moved
            };

            if total == 0 {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::BinaryHeapTimeVortex;
    use sim_net::messages::WireEvent;
    use sim_net::LocalExchange;

    fn wire(time: SimTime, tag: u64) -> WireEvent {
        WireEvent {
            time,
            priority: 0,
            order_tag: 1,
            delivery_tag: tag,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_two_ranks_signal_propagation() {
        // S6: SIGUSR1 delivered only to rank 0 is observed by rank 1 at the
        // next rank-sync horizon.
        let hub = LocalExchange::new(2);
        let mut handles = Vec::new();
        for rank in 0..2u32 {
            let transport: Arc<dyn Transport> = Arc::new(hub.endpoint(rank));
            handles.push(std::thread::spawn(move || {
                let world = RankInfo::new(2, 1);
                let my = RankInfo::new(rank, 0);
                let shared = SyncShared::new(rank, world, Some(transport));
                let mut manager = SyncManager::new(my, world, 1000, &[], shared);
                assert_eq!(manager.next_sync_type(), SyncType::Rank);
                assert_eq!(manager.next_sync_time(), 1000);

                let mut vortex = BinaryHeapTimeVortex::new();
                let mine = if rank == 0 {
                    SignalSet { end: 0, usr: 10, alrm: 0 }
                } else {
                    SignalSet::default()
                };
                let outcome = manager
                    .execute(1000, &mut vortex, mine, false, MAX_SIM_TIME)
                    .unwrap();
                assert_eq!(outcome.signals.usr, 10);
                assert!(!outcome.checkpoint_due);
                assert_eq!(manager.next_sync_time(), 2000);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_two_ranks_event_delivery_and_link_pairing() {
        let hub = LocalExchange::new(2);
        let mut handles = Vec::new();
        for rank in 0..2u32 {
            let transport: Arc<dyn Transport> = Arc::new(hub.endpoint(rank));
            handles.push(std::thread::spawn(move || {
                let world = RankInfo::new(2, 1);
                let my = RankInfo::new(rank, 0);
                let shared = SyncShared::new(rank, world, Some(transport));
                let manager = SyncManager::new(my, world, 500, &[], Arc::clone(&shared));

                // Both sides register their half of "wire".
                let target =
                    manager.register_link(RankInfo::new(1 - rank, 0), "wire", u64::from(rank) + 50);
                manager.exchange_link_info().unwrap();
                let remote = manager.remote_tag("wire").unwrap();
                assert_eq!(remote, u64::from(1 - rank) + 50);

                // Rank 0 sends one event tagged for the remote side.
                let mut manager = manager;
                let mut vortex = BinaryHeapTimeVortex::new();
                if rank == 0 {
                    if let SendTarget::Queue(queue) = &target {
                        queue
                            .lock()
                            .unwrap()
                            .insert(Activity::from_wire(wire(400, remote), 0));
                    } else {
                        panic!("cross-rank link must get a queue");
                    }
                }

                manager
                    .execute(500, &mut vortex, SignalSet::default(), false, MAX_SIM_TIME)
                    .unwrap();
                if rank == 1 {
                    let delivered = vortex.pop_until(MAX_SIM_TIME);
                    assert_eq!(delivered.len(), 1);
                    assert_eq!(delivered[0].delivery_tag, 51);
                    assert_eq!(delivered[0].time, 400);
                } else {
                    assert_eq!(vortex.depth(), 0);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_two_threads_pick_thread_plane() {
        let world = RankInfo::new(1, 2);
        let shared = SyncShared::new(0, world, None);
        let mut handles = Vec::new();
        for thread in 0..2u32 {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                let my = RankInfo::new(0, thread);
                let mut manager = SyncManager::new(my, world, MAX_SIM_TIME, &[200], shared);
                assert_eq!(manager.next_sync_type(), SyncType::Thread);
                assert_eq!(manager.next_sync_time(), 200);

                // Thread 0 sends to thread 1 through its thread queue.
                let target = manager.register_link(RankInfo::new(0, 1 - thread), "pair", 9);
                let mut vortex = BinaryHeapTimeVortex::new();
                if thread == 0 {
                    if let SendTarget::Queue(queue) = &target {
                        queue
                            .lock()
                            .unwrap()
                            .insert(Activity::from_wire(wire(150, 9), 0));
                    }
                }
                manager
                    .execute(200, &mut vortex, SignalSet::default(), false, MAX_SIM_TIME)
                    .unwrap();
                if thread == 1 {
                    assert_eq!(vortex.depth(), 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_same_thread_link_goes_direct() {
        let world = RankInfo::new(1, 1);
        let shared = SyncShared::new(0, world, None);
        let manager = SyncManager::new(RankInfo::new(0, 0), world, MAX_SIM_TIME, &[], shared);
        assert!(matches!(
            manager.register_link(RankInfo::new(0, 0), "self", 1),
            SendTarget::Direct
        ));
    }

    #[test]
    fn test_untimed_quiesce_across_ranks() {
        let hub = LocalExchange::new(2);
        let mut handles = Vec::new();
        for rank in 0..2u32 {
            let transport: Arc<dyn Transport> = Arc::new(hub.endpoint(rank));
            handles.push(std::thread::spawn(move || {
                let world = RankInfo::new(2, 1);
                let shared = SyncShared::new(rank, world, Some(transport));
                let mut manager =
                    SyncManager::new(RankInfo::new(rank, 0), world, 100, &[], shared);
                if rank == 0 {
                    manager.send_untimed(RankInfo::new(1, 0), wire(0, 4));
                }
                let mut vortex = BinaryHeapTimeVortex::new();
                manager.exchange_untimed_data(&mut vortex).unwrap();
                if rank == 1 {
                    assert_eq!(vortex.depth(), 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_checkpoint_agreement_spreads() {
        let hub = LocalExchange::new(2);
        let mut handles = Vec::new();
        for rank in 0..2u32 {
            let transport: Arc<dyn Transport> = Arc::new(hub.endpoint(rank));
            handles.push(std::thread::spawn(move || {
                let world = RankInfo::new(2, 1);
                let shared = SyncShared::new(rank, world, Some(transport));
                let mut manager =
                    SyncManager::new(RankInfo::new(rank, 0), world, 100, &[], shared);
                let mut vortex = BinaryHeapTimeVortex::new();
                // Only rank 0 requests the checkpoint; both observe it.
                let outcome = manager
                    .execute(100, &mut vortex, SignalSet::default(), rank == 0, MAX_SIM_TIME)
                    .unwrap();
                assert!(outcome.checkpoint_due);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
