//! Interval alarms.
//!
//! Users register (interval-seconds, action) pairs; a single OS alarm is
//! armed for the nearest next fire across all intervals. When it fires,
//! rank 0 / thread 0 measures the elapsed wall time, shares it across ranks
//! (broadcast) and threads (barrier), every interval advances by that
//! amount, due intervals fire, and the alarm is re-armed for the new
//! nearest next fire.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::actions::{RealTimeAction, SimStatus};

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One registered interval and its countdown.
struct IntervalAction {
    interval: u32,
    next_fire: u32,
    action: Box<dyn RealTimeAction>,
}

impl IntervalAction {
    fn new(interval: u32, action: Box<dyn RealTimeAction>) -> Self {
        Self {
            interval,
            next_fire: interval,
            action,
        }
    }

    fn next_alarm_time(&self) -> u32 {
        self.next_fire
    }

    /// Advance by the elapsed wall seconds; fire and reload when the
    /// countdown reaches zero.
    fn execute(&mut self, elapsed: u32, ctx: &mut dyn SimStatus) {
        if self.next_fire <= elapsed {
            self.next_fire = self.interval;
            self.action.execute(ctx);
        } else {
            self.next_fire -= elapsed;
        }
    }
}

/// State shared by every thread's [`AlarmAction`] in one process.
pub struct AlarmShared {
    barrier: Barrier,
    elapsed: AtomicU32,
}

impl AlarmShared {
    /// Create shared state for `num_threads` alarm instances.
    #[must_use]
    pub fn new(num_threads: usize) -> Arc<Self> {
        Arc::new(Self {
            barrier: Barrier::new(num_threads),
            elapsed: AtomicU32::new(0),
        })
    }
}

/// The action registered under SIGALRM: multiplexes all interval actions
/// onto one OS alarm.
pub struct AlarmAction {
    intervals: Vec<IntervalAction>,
    shared: Arc<AlarmShared>,
    /// True on rank 0 / thread 0, the only place the OS alarm is armed.
    alarm_manager: bool,
    /// True on thread 0 of multi-rank runs: shares elapsed time via the
    /// transport.
    rank_leader: bool,
    last_time: u64,
    /// Disarms the real OS alarm (tests).
    arm_os_alarm: bool,
}

impl AlarmAction {
    /// Create one thread's alarm instance.
    #[must_use]
    pub fn new(
        rank: sim_model::RankInfo,
        num_ranks: sim_model::RankInfo,
        shared: Arc<AlarmShared>,
    ) -> Self {
        Self {
            intervals: Vec::new(),
            shared,
            alarm_manager: rank.rank == 0 && rank.thread == 0,
            rank_leader: num_ranks.rank > 1 && rank.thread == 0,
            last_time: 0,
            arm_os_alarm: true,
        }
    }

    /// Keep the OS alarm disarmed; countdown bookkeeping still runs. Used
    /// by tests that drive `execute` directly.
    pub fn disarm_os_alarm(&mut self) {
        self.arm_os_alarm = false;
    }

    /// Register an interval action.
    pub fn add_interval_action(&mut self, interval_seconds: u32, action: Box<dyn RealTimeAction>) {
        self.intervals
            .push(IntervalAction::new(interval_seconds, action));
    }

    /// Whether any registered interval can initiate checkpoints.
    #[must_use]
    pub fn intervals_can_checkpoint(&self) -> bool {
        self.intervals
            .iter()
            .any(|i| i.action.can_initiate_checkpoint())
    }

    fn nearest_fire(&self) -> Option<u32> {
        self.intervals.iter().map(IntervalAction::next_alarm_time).min()
    }

    fn arm(&self, seconds: u32) {
        if self.arm_os_alarm && seconds != 0 {
            // SAFETY: alarm(2) only replaces the pending alarm.
            unsafe {
                libc::alarm(seconds);
            }
        }
    }
}

impl RealTimeAction for AlarmAction {
    fn name(&self) -> &'static str {
        "alarm"
    }

    fn begin(&mut self, _scheduled_time: u64) {
        if self.alarm_manager {
            self.last_time = unix_seconds();
            for interval in &mut self.intervals {
                let scheduled = self.last_time + u64::from(interval.next_alarm_time());
                interval.action.begin(scheduled);
            }
            if let Some(next) = self.nearest_fire() {
                self.arm(next);
            }
        }
        self.shared.barrier.wait();
    }

    fn execute(&mut self, ctx: &mut dyn SimStatus) {
        // Thread 0 determines the elapsed wall time; ranks agree through a
        // broadcast, threads through the shared slot between two barriers.
        if self.alarm_manager {
            let now = unix_seconds();
            let elapsed = (now - self.last_time) as u32;
            self.shared.elapsed.store(elapsed, Ordering::SeqCst);
        }
        if self.rank_leader {
            if let Some(transport) = ctx.transport() {
                let mine = self.shared.elapsed.load(Ordering::SeqCst);
                if let Ok(bytes) = transport.broadcast(mine.to_le_bytes().to_vec()) {
                    let mut word = [0u8; 4];
                    let n = bytes.len().min(4);
                    word[..n].copy_from_slice(&bytes[..n]);
                    self.shared
                        .elapsed
                        .store(u32::from_le_bytes(word), Ordering::SeqCst);
                }
            }
        }
        self.shared.barrier.wait();
        let elapsed = self.shared.elapsed.load(Ordering::SeqCst);
        self.shared.barrier.wait();

        for interval in &mut self.intervals {
            interval.execute(elapsed, ctx);
        }
        self.last_time += u64::from(elapsed);

        if self.alarm_manager {
            if let Some(next) = self.nearest_fire() {
                self.arm(next);
            }
        }
    }

    fn can_initiate_checkpoint(&self) -> bool {
        self.intervals_can_checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_model::RankInfo;
    use sim_net::messages::HeartbeatStats;
    use std::sync::Mutex;

    struct CountingAction {
        fired: Arc<Mutex<u32>>,
    }

    impl RealTimeAction for CountingAction {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn execute(&mut self, _ctx: &mut dyn SimStatus) {
            *self.fired.lock().unwrap() += 1;
        }
    }

    struct NullStatus;

    impl SimStatus for NullStatus {
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
        fn signal_shutdown(&mut self, _abnormal: bool) {}
        fn schedule_checkpoint(&mut self) {}
        fn transport(&self) -> Option<&dyn sim_net::Transport> {
            None
        }
    }

    fn make_alarm() -> (AlarmAction, Arc<Mutex<u32>>, Arc<Mutex<u32>>) {
        let mut alarm = AlarmAction::new(
            RankInfo::new(0, 0),
            RankInfo::new(1, 1),
            AlarmShared::new(1),
        );
        alarm.disarm_os_alarm();
        let fast = Arc::new(Mutex::new(0));
        let slow = Arc::new(Mutex::new(0));
        alarm.add_interval_action(2, Box::new(CountingAction { fired: Arc::clone(&fast) }));
        alarm.add_interval_action(5, Box::new(CountingAction { fired: Arc::clone(&slow) }));
        (alarm, fast, slow)
    }

    #[test]
    fn test_intervals_advance_by_shared_elapsed() {
        let (mut alarm, fast, slow) = make_alarm();
        alarm.begin(0);

        // Simulate 2 wall seconds elapsing: only the 2s interval fires.
        alarm.shared.elapsed.store(2, Ordering::SeqCst);
        alarm.alarm_manager = false; // keep the injected elapsed value
        alarm.execute(&mut NullStatus);
        assert_eq!(*fast.lock().unwrap(), 1);
        assert_eq!(*slow.lock().unwrap(), 0);

        // 3 more seconds: the 5s interval (now at 3) fires, the 2s one
        // fires again.
        alarm.shared.elapsed.store(3, Ordering::SeqCst);
        alarm.execute(&mut NullStatus);
        assert_eq!(*fast.lock().unwrap(), 2);
        assert_eq!(*slow.lock().unwrap(), 1);
    }

    #[test]
    fn test_nearest_fire_tracks_minimum() {
        let (mut alarm, _fast, _slow) = make_alarm();
        alarm.begin(0);
        assert_eq!(alarm.nearest_fire(), Some(2));

        alarm.shared.elapsed.store(2, Ordering::SeqCst);
        alarm.alarm_manager = false;
        alarm.execute(&mut NullStatus);
        // 2s interval reloaded to 2; 5s interval has 3 left.
        assert_eq!(alarm.nearest_fire(), Some(2));
    }

    #[test]
    fn test_checkpoint_capability_bubbles_up() {
        let (mut alarm, _f, _s) = make_alarm();
        assert!(!RealTimeAction::can_initiate_checkpoint(&alarm));
        alarm.add_interval_action(10, Box::new(crate::actions::CheckpointAction));
        assert!(RealTimeAction::can_initiate_checkpoint(&alarm));
    }
}
