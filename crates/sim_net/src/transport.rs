//! The rank transport: batched byte exchange plus barrier-synchronous
//! collectives.
//!
//! The simulator core treats the cluster transport as a primitive - bytes
//! in, bytes out, every rank calling the same operation in the same order.
//! [`LocalTransport`] implements the contract inside one process (its
//! "ranks" are threads sharing a [`LocalExchange`] hub), which is what the
//! test suites and single-process multi-rank harnesses run on.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::NetError;

/// How long a collective waits for its peers before giving up.
const COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// The barrier-synchronous rank transport.
///
/// Every operation is collective: all ranks must call it, in the same
/// order. `exchange` moves at most one blob to each destination rank per
/// call and returns the blobs addressed to the caller keyed by source rank.
pub trait Transport: Send + Sync {
    /// This endpoint's rank.
    fn my_rank(&self) -> u32;

    /// Number of ranks in the world.
    fn num_ranks(&self) -> u32;

    /// Deliver one blob to each destination rank; returns the blobs
    /// addressed to this rank, keyed by source. Destinations without an
    /// entry receive nothing; sources that sent nothing do not appear in
    /// the result.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, and mismatched collectives.
    fn exchange(&self, outgoing: BTreeMap<u32, Vec<u8>>) -> Result<BTreeMap<u32, Vec<u8>>, NetError>;

    /// Maximum of `value` across all ranks.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, and mismatched collectives.
    fn allreduce_max(&self, value: u64) -> Result<u64, NetError>;

    /// Sum of `value` across all ranks.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, and mismatched collectives.
    fn allreduce_sum(&self, value: u64) -> Result<u64, NetError>;

    /// Rank 0's bytes, delivered to every rank. Non-root callers' input is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, and mismatched collectives.
    fn broadcast(&self, bytes: Vec<u8>) -> Result<Vec<u8>, NetError>;

    /// Block until every rank arrives.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, and mismatched collectives.
    fn barrier(&self) -> Result<(), NetError>;
}

#[derive(Debug)]
enum Op {
    Exchange(BTreeMap<u32, Vec<u8>>),
    Max(u64),
    Sum(u64),
    Broadcast(Vec<u8>),
    Barrier,
}

impl Op {
    fn kind(&self) -> u8 {
        match self {
            Op::Exchange(_) => 0,
            Op::Max(_) => 1,
            Op::Sum(_) => 2,
            Op::Broadcast(_) => 3,
            Op::Barrier => 4,
        }
    }
}

#[derive(Debug, Clone)]
enum OpResult {
    Exchange(BTreeMap<u32, Vec<u8>>),
    Value(u64),
    Broadcast(Vec<u8>),
    Barrier,
}

struct HubState {
    deposits: Vec<Option<Op>>,
    results: Vec<Option<OpResult>>,
    poisoned: bool,
}

/// The shared rendezvous hub behind a set of [`LocalTransport`] endpoints.
pub struct LocalExchange {
    n: usize,
    state: Mutex<HubState>,
    cv: Condvar,
}

impl LocalExchange {
    /// Create a hub for `n` in-process ranks.
    #[must_use]
    pub fn new(n: usize) -> Arc<Self> {
        Arc::new(Self {
            n,
            state: Mutex::new(HubState {
                deposits: (0..n).map(|_| None).collect(),
                results: (0..n).map(|_| None).collect(),
                poisoned: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// The endpoint for one rank.
    #[must_use]
    pub fn endpoint(self: &Arc<Self>, rank: u32) -> LocalTransport {
        LocalTransport {
            rank,
            hub: Arc::clone(self),
        }
    }

    /// All deposits are in; compute each rank's result. Deposits stay in
    /// place until the last result is collected, which is what keeps a fast
    /// rank from starting the next round early. Mixed operation kinds mean
    /// the ranks diverged, which poisons the hub.
    fn finish_round(state: &mut HubState) {
        let kind = state.deposits[0].as_ref().map(Op::kind);
        if state
            .deposits
            .iter()
            .any(|d| d.as_ref().map(Op::kind) != kind)
        {
            state.poisoned = true;
            return;
        }

        let results: Vec<OpResult> = match state.deposits[0].as_ref() {
            Some(Op::Exchange(_)) => (0..state.deposits.len())
                .map(|me| {
                    let mut inbox = BTreeMap::new();
                    for (source, op) in state.deposits.iter().enumerate() {
                        if let Some(Op::Exchange(map)) = op {
                            if let Some(bytes) = map.get(&(me as u32)) {
                                inbox.insert(source as u32, bytes.clone());
                            }
                        }
                    }
                    OpResult::Exchange(inbox)
                })
                .collect(),
            Some(Op::Max(_)) => {
                let folded = state
                    .deposits
                    .iter()
                    .map(|op| if let Some(Op::Max(v)) = op { *v } else { 0 })
                    .max()
                    .unwrap_or(0);
                vec![OpResult::Value(folded); state.deposits.len()]
            }
            Some(Op::Sum(_)) => {
                let folded = state
                    .deposits
                    .iter()
                    .map(|op| if let Some(Op::Sum(v)) = op { *v } else { 0 })
                    .sum();
                vec![OpResult::Value(folded); state.deposits.len()]
            }
            Some(Op::Broadcast(_)) => {
                let root = if let Some(Op::Broadcast(bytes)) = state.deposits[0].as_ref() {
                    bytes.clone()
                } else {
                    Vec::new()
                };
                vec![OpResult::Broadcast(root); state.deposits.len()]
            }
            _ => vec![OpResult::Barrier; state.deposits.len()],
        };
        for (slot, result) in state.results.iter_mut().zip(results) {
            *slot = Some(result);
        }
    }

    fn collective(&self, rank: usize, op: Op) -> Result<OpResult, NetError> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Wait for the previous round to fully drain before depositing.
        while state.deposits[rank].is_some() && !state.poisoned {
            let (s, timeout) = self
                .cv
                .wait_timeout(state, COLLECTIVE_TIMEOUT)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = s;
            if timeout.timed_out() {
                return Err(NetError::Timeout("previous round never drained".to_string()));
            }
        }
        if state.poisoned {
            return Err(NetError::CollectiveMismatch);
        }

        state.deposits[rank] = Some(op);
        if state.deposits.iter().all(Option::is_some) {
            Self::finish_round(&mut state);
        }
        self.cv.notify_all();

        while state.results[rank].is_none() && !state.poisoned {
            let (s, timeout) = self
                .cv
                .wait_timeout(state, COLLECTIVE_TIMEOUT)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = s;
            if timeout.timed_out() {
                return Err(NetError::Timeout("peers never arrived".to_string()));
            }
        }
        if state.poisoned {
            self.cv.notify_all();
            return Err(NetError::CollectiveMismatch);
        }

        let result = state.results[rank].take().ok_or(NetError::Closed)?;
        if state.results.iter().all(Option::is_none) {
            // Last reader out clears the deposits, releasing the next round.
            for d in &mut state.deposits {
                *d = None;
            }
            self.cv.notify_all();
        }
        Ok(result)
    }
}

/// One rank's endpoint of a [`LocalExchange`].
pub struct LocalTransport {
    rank: u32,
    hub: Arc<LocalExchange>,
}

impl Transport for LocalTransport {
    fn my_rank(&self) -> u32 {
        self.rank
    }

    fn num_ranks(&self) -> u32 {
        self.hub.n as u32
    }

    fn exchange(&self, outgoing: BTreeMap<u32, Vec<u8>>) -> Result<BTreeMap<u32, Vec<u8>>, NetError> {
        if let Some(&dest) = outgoing.keys().find(|&&d| d >= self.num_ranks()) {
            return Err(NetError::BadRank {
                rank: dest,
                world: self.num_ranks(),
            });
        }
        match self.hub.collective(self.rank as usize, Op::Exchange(outgoing))? {
            OpResult::Exchange(inbox) => Ok(inbox),
            _ => Err(NetError::CollectiveMismatch),
        }
    }

    fn allreduce_max(&self, value: u64) -> Result<u64, NetError> {
        match self.hub.collective(self.rank as usize, Op::Max(value))? {
            OpResult::Value(v) => Ok(v),
            _ => Err(NetError::CollectiveMismatch),
        }
    }

    fn allreduce_sum(&self, value: u64) -> Result<u64, NetError> {
        match self.hub.collective(self.rank as usize, Op::Sum(value))? {
            OpResult::Value(v) => Ok(v),
            _ => Err(NetError::CollectiveMismatch),
        }
    }

    fn broadcast(&self, bytes: Vec<u8>) -> Result<Vec<u8>, NetError> {
        match self.hub.collective(self.rank as usize, Op::Broadcast(bytes))? {
            OpResult::Broadcast(b) => Ok(b),
            _ => Err(NetError::CollectiveMismatch),
        }
    }

    fn barrier(&self) -> Result<(), NetError> {
        match self.hub.collective(self.rank as usize, Op::Barrier)? {
            OpResult::Barrier => Ok(()),
            _ => Err(NetError::CollectiveMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_world<F>(n: u32, f: F)
    where
        F: Fn(LocalTransport) + Send + Sync + Clone + 'static,
    {
        let hub = LocalExchange::new(n as usize);
        let handles: Vec<_> = (0..n)
            .map(|rank| {
                let endpoint = hub.endpoint(rank);
                let f = f.clone();
                std::thread::spawn(move || f(endpoint))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_allreduce_max_and_sum() {
        run_world(3, |t| {
            let max = t.allreduce_max(u64::from(t.my_rank()) * 10).unwrap();
            assert_eq!(max, 20);
            let sum = t.allreduce_sum(u64::from(t.my_rank())).unwrap();
            assert_eq!(sum, 3);
        });
    }

    #[test]
    fn test_broadcast_from_root() {
        run_world(3, |t| {
            let input = if t.my_rank() == 0 { vec![7, 8, 9] } else { Vec::new() };
            let out = t.broadcast(input).unwrap();
            assert_eq!(out, vec![7, 8, 9]);
        });
    }

    #[test]
    fn test_exchange_routes_by_destination() {
        run_world(2, |t| {
            let me = t.my_rank();
            let peer = 1 - me;
            let mut outgoing = BTreeMap::new();
            outgoing.insert(peer, vec![me as u8; 4]);
            let inbox = t.exchange(outgoing).unwrap();
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[&peer], vec![peer as u8; 4]);
        });
    }

    #[test]
    fn test_repeated_rounds_stay_in_step() {
        run_world(2, |t| {
            for round in 0..20u64 {
                let sum = t.allreduce_sum(round).unwrap();
                assert_eq!(sum, round * 2);
                t.barrier().unwrap();
            }
        });
    }

    #[test]
    fn test_exchange_rejects_bad_destination() {
        run_world(1, |t| {
            let mut outgoing = BTreeMap::new();
            outgoing.insert(9u32, vec![1]);
            assert!(matches!(
                t.exchange(outgoing),
                Err(NetError::BadRank { .. })
            ));
        });
    }
}
