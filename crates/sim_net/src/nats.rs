//! NATS-backed rank transport.
//!
//! Each rank subscribes once to its own inbox subject; every operation
//! publishes envelopes into peer inboxes and then collects one envelope per
//! peer for the same round. Rounds are numbered by a per-endpoint sequence
//! counter - ranks call collectives in lockstep, so the counters agree -
//! and envelopes arriving early for a later round are parked until their
//! round comes up.
//!
//! The runtime is owned by the transport; callers stay synchronous.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::subjects;
use crate::transport::Transport;

/// How long to wait for peer envelopes before giving up.
const PEER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum EnvelopeKind {
    Exchange,
    Max,
    Sum,
    Broadcast,
    Barrier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    seq: u64,
    source: u32,
    kind: EnvelopeKind,
    payload: Vec<u8>,
}

/// Generate a fresh run id for namespacing one simulation's subjects.
#[must_use]
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A rank transport speaking NATS.
pub struct NatsTransport {
    runtime: tokio::runtime::Runtime,
    client: async_nats::Client,
    inbox: Mutex<InboxState>,
    seq: AtomicU64,
    run_id: String,
    my_rank: u32,
    num_ranks: u32,
}

struct InboxState {
    subscriber: async_nats::Subscriber,
    parked: Vec<Envelope>,
}

impl NatsTransport {
    /// Connect to NATS and subscribe this rank's inbox.
    ///
    /// All ranks of a run must share `run_id` (typically generated by the
    /// launcher and passed through the environment).
    ///
    /// # Errors
    ///
    /// Runtime construction, connection, or subscription failures.
    pub fn connect(url: &str, run_id: &str, my_rank: u32, num_ranks: u32) -> Result<Self, NetError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (client, subscriber) = runtime.block_on(async {
            let client = async_nats::connect(url).await?;
            let subscriber = client
                .subscribe(subjects::rank_inbox(run_id, my_rank))
                .await?;
            Ok::<_, NetError>((client, subscriber))
        })?;
        tracing::info!(url, run_id, rank = my_rank, ranks = num_ranks, "rank transport connected");

        Ok(Self {
            runtime,
            client,
            inbox: Mutex::new(InboxState {
                subscriber,
                parked: Vec::new(),
            }),
            seq: AtomicU64::new(0),
            run_id: run_id.to_string(),
            my_rank,
            num_ranks,
        })
    }

    /// The run id this transport is namespaced under.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Publish one envelope into a peer's inbox.
    async fn send(&self, dest: u32, envelope: &Envelope) -> Result<(), NetError> {
        let bytes = crate::codec::encode(envelope)?;
        self.client
            .publish(subjects::rank_inbox(&self.run_id, dest), bytes.into())
            .await?;
        Ok(())
    }

    /// Collect `expected` envelopes for round `seq`, parking any that
    /// belong to later rounds.
    fn collect(&self, seq: u64, expected: usize) -> Result<Vec<Envelope>, NetError> {
        let mut inbox = self
            .inbox
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut collected: Vec<Envelope> = Vec::with_capacity(expected);

        // Earlier arrivals first.
        let mut still_parked = Vec::new();
        for env in inbox.parked.drain(..) {
            if env.seq == seq {
                collected.push(env);
            } else {
                still_parked.push(env);
            }
        }
        inbox.parked = still_parked;

        while collected.len() < expected {
            let msg = self
                .runtime
                .block_on(async {
                    tokio::time::timeout(PEER_TIMEOUT, inbox.subscriber.next()).await
                })
                .map_err(|_| NetError::Timeout(format!("round {seq}")))?
                .ok_or(NetError::Closed)?;
            let env: Envelope = crate::codec::decode(&msg.payload)?;
            if env.seq == seq {
                collected.push(env);
            } else if env.seq > seq {
                inbox.parked.push(env);
            }
            // Envelopes for past rounds are duplicates; drop them.
        }
        Ok(collected)
    }

    fn flush(&self) -> Result<(), NetError> {
        self.runtime
            .block_on(self.client.flush())
            .map_err(|e| NetError::Transport(e.to_string()))
    }

    /// One all-gather round: publish a payload to every peer, collect one
    /// envelope per peer back.
    fn all_gather(&self, kind: EnvelopeKind, payload: Vec<u8>) -> Result<Vec<Envelope>, NetError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            seq,
            source: self.my_rank,
            kind,
            payload,
        };
        self.runtime.block_on(async {
            for dest in 0..self.num_ranks {
                if dest != self.my_rank {
                    self.send(dest, &envelope).await?;
                }
            }
            Ok::<(), NetError>(())
        })?;
        self.flush()?;

        let mut envelopes = self.collect(seq, self.num_ranks as usize - 1)?;
        if envelopes.iter().any(|e| e.kind != kind) {
            return Err(NetError::CollectiveMismatch);
        }
        envelopes.push(envelope);
        Ok(envelopes)
    }
}

impl Transport for NatsTransport {
    fn my_rank(&self) -> u32 {
        self.my_rank
    }

    fn num_ranks(&self) -> u32 {
        self.num_ranks
    }

    fn exchange(&self, outgoing: BTreeMap<u32, Vec<u8>>) -> Result<BTreeMap<u32, Vec<u8>>, NetError> {
        if let Some(&dest) = outgoing.keys().find(|&&d| d >= self.num_ranks) {
            return Err(NetError::BadRank {
                rank: dest,
                world: self.num_ranks,
            });
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        // Every peer gets exactly one envelope per round (possibly empty),
        // so the receive side knows how many to expect.
        self.runtime.block_on(async {
            for dest in 0..self.num_ranks {
                if dest == self.my_rank {
                    continue;
                }
                let envelope = Envelope {
                    seq,
                    source: self.my_rank,
                    kind: EnvelopeKind::Exchange,
                    payload: outgoing.get(&dest).cloned().unwrap_or_default(),
                };
                self.send(dest, &envelope).await?;
            }
            Ok::<(), NetError>(())
        })?;
        self.flush()?;

        let mut inbox = BTreeMap::new();
        for env in self.collect(seq, self.num_ranks as usize - 1)? {
            if env.kind != EnvelopeKind::Exchange {
                return Err(NetError::CollectiveMismatch);
            }
            if !env.payload.is_empty() {
                inbox.insert(env.source, env.payload);
            }
        }
        // Anything addressed to this rank stays local.
        if let Some(own) = outgoing.get(&self.my_rank) {
            inbox.insert(self.my_rank, own.clone());
        }
        Ok(inbox)
    }

    fn allreduce_max(&self, value: u64) -> Result<u64, NetError> {
        let envelopes = self.all_gather(EnvelopeKind::Max, value.to_le_bytes().to_vec())?;
        Ok(envelopes
            .iter()
            .map(|e| decode_word(&e.payload))
            .max()
            .unwrap_or(value))
    }

    fn allreduce_sum(&self, value: u64) -> Result<u64, NetError> {
        let envelopes = self.all_gather(EnvelopeKind::Sum, value.to_le_bytes().to_vec())?;
        Ok(envelopes.iter().map(|e| decode_word(&e.payload)).sum())
    }

    fn broadcast(&self, bytes: Vec<u8>) -> Result<Vec<u8>, NetError> {
        // The root's payload wins; every other rank contributes an empty
        // envelope to keep the round shape uniform.
        let payload = if self.my_rank == 0 { bytes } else { Vec::new() };
        let envelopes = self.all_gather(EnvelopeKind::Broadcast, payload)?;
        envelopes
            .into_iter()
            .find(|e| e.source == 0)
            .map(|e| e.payload)
            .ok_or(NetError::Closed)
    }

    fn barrier(&self) -> Result<(), NetError> {
        self.all_gather(EnvelopeKind::Barrier, Vec::new())?;
        Ok(())
    }
}

fn decode_word(payload: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let n = payload.len().min(8);
    bytes[..n].copy_from_slice(&payload[..n]);
    u64::from_le_bytes(bytes)
}
