//! Health watchdog - signal-lost detection from record cadence
//!
//! A pure state machine: the caller feeds it record arrivals, deadline ticks
//! and worker stops, and it reports a new `HealthState` only when the state
//! actually changes. The driver (the manager's pump task) sleeps until
//! [`HealthWatchdog::deadline`] and then calls [`HealthWatchdog::on_tick`].
//!
//! ```text
//! Disconnected ──record──▶ Connected ──deadline──▶ Warning
//!       ▲                    ▲   │record (re-arm)    │
//!       │                    └───┴───────record──────┘
//!       └──────────── worker stopped (any state) ────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::types::HealthState;

#[derive(Debug, Clone)]
pub struct HealthWatchdog {
    state: HealthState,
    interval: Duration,
    /// Single-shot; `None` while disconnected or already in `Warning`
    deadline: Option<Instant>,
}

impl HealthWatchdog {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: HealthState::Disconnected,
            interval,
            deadline: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A record arrived: (re)arm the deadline and go `Connected`.
    pub fn on_record(&mut self, now: Instant) -> Option<HealthState> {
        self.deadline = Some(now + self.interval);
        self.transition(HealthState::Connected)
    }

    /// Check the deadline. Fires at most once per arming.
    pub fn on_tick(&mut self, now: Instant) -> Option<HealthState> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.transition(HealthState::Warning)
            }
            _ => None,
        }
    }

    /// The worker stopped, for whatever reason.
    pub fn on_stopped(&mut self) -> Option<HealthState> {
        self.deadline = None;
        self.transition(HealthState::Disconnected)
    }

    fn transition(&mut self, next: HealthState) -> Option<HealthState> {
        if self.state == next {
            None
        } else {
            self.state = next;
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[test]
    fn test_starts_disconnected_without_deadline() {
        let mut wd = HealthWatchdog::new(INTERVAL);
        assert_eq!(wd.state(), HealthState::Disconnected);
        assert_eq!(wd.deadline(), None);
        assert_eq!(wd.on_tick(Instant::now() + INTERVAL * 5), None);
    }

    #[test]
    fn test_signal_lost_and_recovery() {
        let t0 = Instant::now();
        let mut wd = HealthWatchdog::new(INTERVAL);

        assert_eq!(wd.on_record(t0), Some(HealthState::Connected));
        assert_eq!(wd.deadline(), Some(t0 + INTERVAL));

        // Records inside the interval only re-arm
        let t1 = t0 + Duration::from_secs(2);
        assert_eq!(wd.on_record(t1), None);
        assert_eq!(wd.on_tick(t0 + INTERVAL), None);

        assert_eq!(wd.on_tick(t1 + INTERVAL), Some(HealthState::Warning));
        // Sticky until the next record
        assert_eq!(wd.on_tick(t1 + INTERVAL * 3), None);
        assert_eq!(wd.state(), HealthState::Warning);

        let t2 = t1 + INTERVAL * 4;
        assert_eq!(wd.on_record(t2), Some(HealthState::Connected));
        assert_eq!(wd.deadline(), Some(t2 + INTERVAL));
    }

    #[test]
    fn test_stop_resets_from_any_state() {
        let t0 = Instant::now();
        let mut wd = HealthWatchdog::new(INTERVAL);
        assert_eq!(wd.on_stopped(), None);

        wd.on_record(t0);
        assert_eq!(wd.on_stopped(), Some(HealthState::Disconnected));
        assert_eq!(wd.deadline(), None);

        wd.on_record(t0);
        wd.on_tick(t0 + INTERVAL);
        assert_eq!(wd.state(), HealthState::Warning);
        assert_eq!(wd.on_stopped(), Some(HealthState::Disconnected));
    }
}
