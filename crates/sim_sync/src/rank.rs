//! Inter-rank synchronization.
//!
//! Conducted collectively across all ranks at each rank horizon: buffered
//! event batches are exchanged keyed by destination (rank, thread), the
//! three signal numbers are reduced so every rank observes the same set,
//! and untimed traffic quiesces through a counted loop before and after
//! timed simulation.
//!
//! Cross-partition link halves pair by name: each rank publishes the
//! delivery tags of its receive-side links once at startup, and the sender
//! stamps outgoing events with the remote side's tag.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use sim_model::time::{SimTime, MAX_SIM_TIME};
use sim_model::RankInfo;
use sim_net::messages::{EventBatch, LinkInfo, LinkInfoExchange, SignalSet, SyncPayload, WireEvent};
use sim_net::Transport;

use crate::activity::Activity;
use crate::error::SyncError;
use crate::queue::SyncQueue;

/// The inter-rank half of the sync manager. Lives on thread 0 of each
/// process; other threads participate through the barrier bracketing in the
/// manager.
pub struct RankSync {
    my_rank: u32,
    num_ranks: RankInfo,
    /// Send buffers keyed by destination (rank, thread).
    queues: BTreeMap<RankInfo, Arc<Mutex<SyncQueue>>>,
    /// Receive-side delivery tags to publish, keyed by remote rank.
    local_tags: BTreeMap<u32, Vec<LinkInfo>>,
    /// Remote delivery tags learned from the peers, keyed by link name.
    remote_tags: BTreeMap<String, u64>,
    next_sync_time: SimTime,
    recv_seq: u64,
}

impl RankSync {
    /// Create the rank sync for this process.
    #[must_use]
    pub fn new(my_rank: u32, num_ranks: RankInfo) -> Self {
        Self {
            my_rank,
            num_ranks,
            queues: BTreeMap::new(),
            local_tags: BTreeMap::new(),
            remote_tags: BTreeMap::new(),
            next_sync_time: MAX_SIM_TIME,
            recv_seq: 0,
        }
    }

    /// The next horizon this sync wants to run at.
    #[must_use]
    pub fn next_sync_time(&self) -> SimTime {
        self.next_sync_time
    }

    /// Re-seat the horizon (set after registration and on restart).
    pub fn set_next_sync_time(&mut self, time: SimTime) {
        self.next_sync_time = time;
    }

    /// Register a cross-rank link.
    ///
    /// `to` is the remote (rank, thread); `name` pairs the two halves;
    /// `local_delivery_tag` is how inbound events for this link dispatch on
    /// this side. Returns the queue send-side insertions go into.
    pub fn register_link(
        &mut self,
        to: RankInfo,
        name: &str,
        local_delivery_tag: u64,
    ) -> Arc<Mutex<SyncQueue>> {
        self.local_tags.entry(to.rank).or_default().push(LinkInfo {
            name: name.to_string(),
            delivery_tag: local_delivery_tag,
        });
        Arc::clone(
            self.queues
                .entry(to)
                .or_insert_with(|| Arc::new(Mutex::new(SyncQueue::new(to)))),
        )
    }

    /// Publish local delivery tags and learn the remote ones. One
    /// collective round; must run on every rank after link registration.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub fn exchange_link_info(&mut self, transport: &dyn Transport) -> Result<(), SyncError> {
        let mut outgoing = BTreeMap::new();
        for (&rank, links) in &self.local_tags {
            let payload = LinkInfoExchange {
                source: self.my_rank,
                links: links.clone(),
            };
            outgoing.insert(rank, sim_net::encode(&payload)?);
        }
        for bytes in transport.exchange(outgoing)?.into_values() {
            let info: LinkInfoExchange = sim_net::decode(&bytes)?;
            for link in info.links {
                self.remote_tags.insert(link.name, link.delivery_tag);
            }
        }
        Ok(())
    }

    /// The remote delivery tag for a cross-rank link, once exchanged.
    #[must_use]
    pub fn remote_tag(&self, name: &str) -> Option<u64> {
        self.remote_tags.get(name).copied()
    }

    /// Bytes buffered for the next exchange.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.queues
            .values()
            .map(|q| {
                q.lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .data_size()
            })
            .sum()
    }

    fn drain_to_payloads(&mut self) -> BTreeMap<u32, SyncPayload> {
        let mut payloads: BTreeMap<u32, SyncPayload> = BTreeMap::new();
        for (&dest, queue) in &self.queues {
            let activities = queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if activities.is_empty() {
                continue;
            }
            payloads
                .entry(dest.rank)
                .or_default()
                .batches
                .push(EventBatch {
                    dest,
                    events: activities.iter().map(Activity::to_wire).collect(),
                });
        }
        payloads
    }

    fn deliver_payload(
        &mut self,
        payload: SyncPayload,
        deliver: &mut dyn FnMut(u32, Activity),
    ) -> u64 {
        let mut moved = 0;
        for batch in payload.batches {
            for event in batch.events {
                let activity = Activity::from_wire(event, self.recv_seq);
                self.recv_seq += 1;
                deliver(batch.dest.thread, activity);
                moved += 1;
            }
        }
        for event in payload.untimed {
            let activity = Activity::from_wire(event, self.recv_seq);
            self.recv_seq += 1;
            deliver(0, activity);
            moved += 1;
        }
        moved
    }

    /// Run one rank sync at `current`: exchange the window's batches and
    /// reduce the signal sets.
    ///
    /// `deliver` receives each inbound activity with its destination
    /// thread; messages from a given source arrive in that source's send
    /// order.
    ///
    /// # Errors
    ///
    /// Transport failures are fatal.
    pub fn execute(
        &mut self,
        current: SimTime,
        min_part: SimTime,
        transport: &dyn Transport,
        signals: SignalSet,
        deliver: &mut dyn FnMut(u32, Activity),
    ) -> Result<SignalSet, SyncError> {
        let mut outgoing = BTreeMap::new();
        for (rank, payload) in self.drain_to_payloads() {
            outgoing.insert(rank, sim_net::encode(&payload)?);
        }
        let inbound = transport.exchange(outgoing)?;
        // BTreeMap iteration gives ascending source rank, keeping delivery
        // deterministic across runs.
        for bytes in inbound.into_values() {
            let payload: SyncPayload = sim_net::decode(&bytes)?;
            self.deliver_payload(payload, deliver);
        }

        let observed = SignalSet::unpack(transport.allreduce_max(signals.pack())?);

        self.next_sync_time = current.saturating_add(min_part);
        Ok(observed)
    }

    /// Queue an untimed message toward a remote partition.
    pub fn send_untimed(&mut self, to: RankInfo, event: WireEvent) {
        let queue = self
            .queues
            .entry(to)
            .or_insert_with(|| Arc::new(Mutex::new(SyncQueue::new(to))));
        queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(Activity::from_wire(event, 0));
    }

    /// One round of the untimed quiesce loop: exchange whatever is queued
    /// and return the number of messages moved across the whole world.
    ///
    /// # Errors
    ///
    /// Transport failures are fatal.
    pub fn exchange_untimed(
        &mut self,
        transport: &dyn Transport,
        deliver: &mut dyn FnMut(u32, Activity),
    ) -> Result<u64, SyncError> {
        let mut outgoing = BTreeMap::new();
        let mut sent = 0u64;
        for (&dest, queue) in &self.queues {
            let activities = queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if activities.is_empty() {
                continue;
            }
            sent += activities.len() as u64;
            let payload = SyncPayload {
                batches: Vec::new(),
                untimed: activities.iter().map(Activity::to_wire).collect(),
            };
            outgoing
                .entry(dest.rank)
                .and_modify(|existing: &mut SyncPayload| {
                    existing.untimed.extend(payload.untimed.clone());
                })
                .or_insert(payload);
        }
        let encoded: BTreeMap<u32, Vec<u8>> = outgoing
            .into_iter()
            .map(|(rank, payload)| Ok((rank, sim_net::encode(&payload)?)))
            .collect::<Result<_, SyncError>>()?;

        for bytes in transport.exchange(encoded)?.into_values() {
            let payload: SyncPayload = sim_net::decode(&bytes)?;
            self.deliver_payload(payload, deliver);
        }

        // The loop runs until no rank moved anything.
        Ok(transport.allreduce_sum(sent)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_net::LocalExchange;

    fn wire(time: SimTime, tag: u64) -> WireEvent {
        WireEvent {
            time,
            priority: 0,
            order_tag: 1,
            delivery_tag: tag,
            payload: vec![1],
        }
    }

    /// Run `f` on `n` single-thread "ranks" backed by a local exchange.
    fn run_ranks<F>(n: u32, f: F)
    where
        F: Fn(u32, sim_net::LocalTransport) + Send + Sync + Clone + 'static,
    {
        let hub = LocalExchange::new(n as usize);
        let handles: Vec<_> = (0..n)
            .map(|rank| {
                let endpoint = hub.endpoint(rank);
                let f = f.clone();
                std::thread::spawn(move || f(rank, endpoint))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_link_info_pairing() {
        run_ranks(2, |rank, transport| {
            let mut sync = RankSync::new(rank, RankInfo::new(2, 1));
            let peer = RankInfo::new(1 - rank, 0);
            // Each side registers its half of "wire" with its own tag.
            sync.register_link(peer, "wire", u64::from(rank) + 100);
            sync.exchange_link_info(&transport).unwrap();
            // Each side learned the other's tag.
            assert_eq!(sync.remote_tag("wire"), Some(u64::from(1 - rank) + 100));
        });
    }

    #[test]
    fn test_event_exchange_preserves_send_order() {
        run_ranks(2, |rank, transport| {
            let mut sync = RankSync::new(rank, RankInfo::new(2, 1));
            let peer = RankInfo::new(1 - rank, 0);
            let queue = sync.register_link(peer, "wire", 7);

            // Rank 0 sends three events in order; rank 1 sends nothing.
            if rank == 0 {
                let mut q = queue.lock().unwrap();
                for i in 0..3u64 {
                    q.insert(Activity::from_wire(wire(10 + i, 7), i));
                }
            }

            let mut received = Vec::new();
            let observed = sync
                .execute(
                    0,
                    100,
                    &transport,
                    SignalSet::default(),
                    &mut |thread, activity| received.push((thread, activity)),
                )
                .unwrap();
            assert!(!observed.any());
            assert_eq!(sync.next_sync_time(), 100);

            if rank == 1 {
                let times: Vec<SimTime> = received.iter().map(|(_, a)| a.time).collect();
                assert_eq!(times, vec![10, 11, 12]);
                // Receive sequence is stamped in arrival order.
                assert!(received.windows(2).all(|w| w[0].1.seq < w[1].1.seq));
            } else {
                assert!(received.is_empty());
            }
        });
    }

    #[test]
    fn test_signal_reduction_reaches_all_ranks() {
        run_ranks(2, |rank, transport| {
            let mut sync = RankSync::new(rank, RankInfo::new(2, 1));
            // Only rank 0 received SIGUSR1.
            let mine = if rank == 0 {
                SignalSet { end: 0, usr: 10, alrm: 0 }
            } else {
                SignalSet::default()
            };
            let observed = sync
                .execute(0, 50, &transport, mine, &mut |_, _| {})
                .unwrap();
            assert_eq!(observed.usr, 10);
        });
    }

    #[test]
    fn test_untimed_quiesce_loop() {
        run_ranks(2, |rank, transport| {
            let mut sync = RankSync::new(rank, RankInfo::new(2, 1));
            if rank == 0 {
                sync.send_untimed(RankInfo::new(1, 0), wire(0, 3));
            }
            let mut got = 0;
            loop {
                let moved = sync
                    .exchange_untimed(&transport, &mut |_, _| got += 1)
                    .unwrap();
                if moved == 0 {
                    break;
                }
            }
            if rank == 1 {
                assert_eq!(got, 1);
            }
        });
    }

    #[test]
    fn test_data_size_reporting() {
        let mut sync = RankSync::new(0, RankInfo::new(2, 1));
        let queue = sync.register_link(RankInfo::new(1, 0), "wire", 1);
        assert_eq!(sync.data_size(), 0);
        queue
            .lock()
            .unwrap()
            .insert(Activity::from_wire(wire(5, 1), 0));
        assert!(sync.data_size() > 0);
    }
}
