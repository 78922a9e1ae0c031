//! The real-time manager.
//!
//! Owns the mapping from signal numbers to actions and moves pending OS
//! signals into its own fields when polled. In serial runs the registered
//! action executes immediately; in parallel runs handling is deferred to
//! the next sync horizon so all ranks act coherently - the sync layer
//! fetches the pending set with [`RealTimeManager::take_signals`] and
//! dispatches the agreed set with [`RealTimeManager::perform_signals`].

use std::collections::BTreeMap;
use std::sync::Arc;

use sim_model::RankInfo;
use sim_net::messages::SignalSet;

use crate::actions::{RealTimeAction, SimStatus};
use crate::alarm::{AlarmAction, AlarmShared};
use crate::signals::{self, SIGALRM};

/// Wall-clock signal and alarm coordination for one thread.
pub struct RealTimeManager {
    serial: bool,
    rank: RankInfo,
    num_ranks: RankInfo,
    sig_end: i32,
    sig_usr: i32,
    sig_alrm: i32,
    signal_actions: BTreeMap<i32, Box<dyn RealTimeAction>>,
    /// The SIGALRM multiplexer, created on the first interval
    /// registration.
    alarm: Option<AlarmAction>,
    can_checkpoint: bool,
    alarm_shared: Arc<AlarmShared>,
}

impl RealTimeManager {
    /// Create the manager for one thread.
    #[must_use]
    pub fn new(rank: RankInfo, num_ranks: RankInfo, alarm_shared: Arc<AlarmShared>) -> Self {
        Self {
            serial: num_ranks == RankInfo::new(1, 1),
            rank,
            num_ranks,
            sig_end: 0,
            sig_usr: 0,
            sig_alrm: 0,
            signal_actions: BTreeMap::new(),
            alarm: None,
            can_checkpoint: false,
            alarm_shared,
        }
    }

    /// Whether any registered action can initiate checkpoints.
    #[must_use]
    pub fn can_initiate_checkpoint(&self) -> bool {
        self.can_checkpoint
    }

    /// Bind an action to a signal number.
    pub fn register_signal(&mut self, signum: i32, action: Box<dyn RealTimeAction>) {
        if action.can_initiate_checkpoint() {
            self.can_checkpoint = true;
        }
        self.signal_actions.insert(signum, action);
    }

    /// Register an (interval, action) pair; the SIGALRM multiplexer is
    /// created on first use.
    pub fn register_interval(&mut self, interval_seconds: u32, action: Box<dyn RealTimeAction>) {
        if action.can_initiate_checkpoint() {
            self.can_checkpoint = true;
        }
        let (rank, num_ranks, shared) = (self.rank, self.num_ranks, Arc::clone(&self.alarm_shared));
        self.alarm
            .get_or_insert_with(|| AlarmAction::new(rank, num_ranks, shared))
            .add_interval_action(interval_seconds, action);
    }

    /// Start wall-clock scheduling (arms the first alarm).
    pub fn begin(&mut self) {
        if let Some(alarm) = &mut self.alarm {
            alarm.begin(0);
        }
    }

    /// Poll the OS flags.
    ///
    /// Transfers pending signal numbers into the manager. Serial runs
    /// dispatch immediately; parallel runs leave them for the next sync
    /// horizon.
    pub fn poll(&mut self, ctx: &mut dyn SimStatus) {
        if !signals::take_notified() {
            return;
        }
        let (end, usr, alrm) = signals::take_os_signals();

        if end != 0 {
            self.sig_end = end;
            if self.serial {
                self.perform_signal(end, ctx);
                self.sig_end = 0;
            }
        }
        if usr != 0 {
            self.sig_usr = usr;
            if self.serial {
                self.perform_signal(usr, ctx);
                self.sig_usr = 0;
            }
        }
        if alrm != 0 {
            if self.serial {
                self.perform_signal(SIGALRM, ctx);
            } else {
                self.sig_alrm = SIGALRM;
            }
        }
    }

    /// Take the pending signal set for exchange at a sync horizon,
    /// clearing it.
    pub fn take_signals(&mut self) -> SignalSet {
        let set = SignalSet {
            end: self.sig_end,
            usr: self.sig_usr,
            alrm: self.sig_alrm,
        };
        self.sig_end = 0;
        self.sig_usr = 0;
        self.sig_alrm = 0;
        set
    }

    /// Dispatch one signal's registered action.
    pub fn perform_signal(&mut self, signum: i32, ctx: &mut dyn SimStatus) {
        if signum == SIGALRM {
            if let Some(alarm) = &mut self.alarm {
                alarm.execute(ctx);
            }
            return;
        }
        if let Some(action) = self.signal_actions.get_mut(&signum) {
            tracing::debug!(signum, action = action.name(), "dispatching signal action");
            action.execute(ctx);
        }
    }

    /// Dispatch every signal in an agreed set (used at sync horizons after
    /// the exchange).
    pub fn perform_signals(&mut self, set: SignalSet, ctx: &mut dyn SimStatus) {
        if set.end != 0 {
            self.perform_signal(set.end, ctx);
        }
        if set.usr != 0 {
            self.perform_signal(set.usr, ctx);
        }
        if set.alrm != 0 {
            self.perform_signal(SIGALRM, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ExitCleanAction;
    use crate::signals::{inject_signal, SIGINT, SIGUSR1};
    use sim_net::messages::HeartbeatStats;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        shutdowns: Vec<bool>,
    }

    struct TestStatus {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl SimStatus for TestStatus {
        fn rank(&self) -> RankInfo {
            RankInfo::new(0, 0)
        }
        fn num_ranks(&self) -> RankInfo {
            RankInfo::new(1, 1)
        }
        fn elapsed_sim_time(&self) -> String {
            String::new()
        }
        fn heartbeat_stats(&self) -> HeartbeatStats {
            HeartbeatStats::default()
        }
        fn print_status(&mut self, _component_status: bool) {}
        fn signal_shutdown(&mut self, abnormal: bool) {
            self.recorded.lock().unwrap().shutdowns.push(abnormal);
        }
        fn schedule_checkpoint(&mut self) {}
        fn transport(&self) -> Option<&dyn sim_net::Transport> {
            None
        }
    }

    fn ctx() -> (TestStatus, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (
            TestStatus {
                recorded: Arc::clone(&recorded),
            },
            recorded,
        )
    }

    #[test]
    fn test_serial_poll_dispatches_immediately() {
        let _guard = crate::signals::TEST_SIGNAL_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut manager = RealTimeManager::new(
            RankInfo::new(0, 0),
            RankInfo::new(1, 1),
            AlarmShared::new(1),
        );
        manager.register_signal(SIGINT, Box::new(ExitCleanAction));
        let (mut status, recorded) = ctx();

        inject_signal(SIGINT);
        manager.poll(&mut status);

        assert_eq!(recorded.lock().unwrap().shutdowns, vec![false]);
        // The pending set is already consumed.
        assert!(!manager.take_signals().any());
    }

    #[test]
    fn test_parallel_poll_defers_to_sync() {
        let _guard = crate::signals::TEST_SIGNAL_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut manager = RealTimeManager::new(
            RankInfo::new(0, 0),
            RankInfo::new(2, 1),
            AlarmShared::new(1),
        );
        manager.register_signal(SIGUSR1, Box::new(ExitCleanAction));
        let (mut status, recorded) = ctx();

        inject_signal(SIGUSR1);
        manager.poll(&mut status);

        // Nothing dispatched yet.
        assert!(recorded.lock().unwrap().shutdowns.is_empty());
        let pending = manager.take_signals();
        assert_eq!(pending.usr, SIGUSR1);

        // The agreed set dispatches at the horizon.
        manager.perform_signals(pending, &mut status);
        assert_eq!(recorded.lock().unwrap().shutdowns, vec![false]);
    }

    #[test]
    fn test_interval_registration_creates_alarm_slot() {
        let mut manager = RealTimeManager::new(
            RankInfo::new(0, 0),
            RankInfo::new(1, 1),
            AlarmShared::new(1),
        );
        assert!(!manager.can_initiate_checkpoint());
        manager.register_interval(30, Box::new(crate::actions::CheckpointAction));
        assert!(manager.can_initiate_checkpoint());
        assert!(manager.alarm.is_some());
    }
}
