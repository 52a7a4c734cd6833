//! Instance health state machine.
//!
//! # State Transitions
//! ```text
//! Unknown/Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unknown/Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! Unhealthy → trial request: once per cooldown, until Healthy again
//! ```
//!
//! Active health checks and passive request outcomes feed the same tracker.
//! Counters reset on every opposite outcome so a single blip cannot flap
//! the state. The trial slot lets an instance evicted by request failures
//! come back when no active monitor is probing it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::schema::HealthCheckConfig;

/// Health as seen by the gateway.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Thresholds applied by a [`HealthTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub healthy: u32,
    pub unhealthy: u32,
    /// Wait before an unhealthy instance gets a trial request.
    pub cooldown: Duration,
}

impl Thresholds {
    pub fn from_config(config: &HealthCheckConfig) -> Self {
        Self {
            healthy: config.healthy_threshold,
            unhealthy: config.unhealthy_threshold,
            cooldown: Duration::from_millis(config.recovery_cooldown_ms),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&HealthCheckConfig::default())
    }
}

/// Lock-free hysteresis tracker.
#[derive(Debug)]
pub struct HealthTracker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    origin: Instant,
    /// Millis since `origin` after which an unhealthy instance may be tried.
    trial_at_ms: AtomicU64,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            origin: Instant::now(),
            trial_at_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn schedule_trial(&self, after: Duration) {
        let at = self.now_ms().saturating_add(after.as_millis() as u64);
        self.trial_at_ms.store(at, Ordering::Relaxed);
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Unknown counts as available.
    pub fn is_available(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Record a success. Returns the new state if this caused a transition.
    pub fn record_success(&self, thresholds: Thresholds) -> Option<HealthState> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        match self.state() {
            HealthState::Healthy => return None,
            // Keep the trial slot open until the healthy threshold is reached.
            HealthState::Unhealthy => self.schedule_trial(Duration::ZERO),
            HealthState::Unknown => {}
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= thresholds.healthy.max(1) {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return self.transition(HealthState::Healthy);
        }
        None
    }

    /// Record a failure. Returns the new state if this caused a transition.
    pub fn record_failure(&self, thresholds: Thresholds) -> Option<HealthState> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.state() == HealthState::Unhealthy {
            self.schedule_trial(thresholds.cooldown);
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= thresholds.unhealthy.max(1) {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.schedule_trial(thresholds.cooldown);
            return self.transition(HealthState::Unhealthy);
        }
        None
    }

    /// Claim the trial slot of an unhealthy instance.
    ///
    /// Returns true at most once per `cooldown` while unhealthy. A claimed
    /// trial whose outcome is never recorded just waits out the cooldown.
    pub fn try_begin_trial(&self, cooldown: Duration) -> bool {
        if self.state() != HealthState::Unhealthy {
            return false;
        }
        let now = self.now_ms();
        let due = self.trial_at_ms.load(Ordering::Relaxed);
        if now < due {
            return false;
        }
        let next = now.saturating_add(cooldown.as_millis() as u64);
        self.trial_at_ms
            .compare_exchange(due, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    fn transition(&self, to: HealthState) -> Option<HealthState> {
        let prev = self.state.swap(to as u8, Ordering::Relaxed);
        (prev != to as u8).then_some(to)
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds {
        healthy: 2,
        unhealthy: 3,
        cooldown: Duration::from_millis(20),
    };

    #[test]
    fn failures_cross_threshold_once() {
        let tracker = HealthTracker::new();
        assert!(tracker.is_available());
        assert_eq!(tracker.record_failure(T), None);
        assert_eq!(tracker.record_failure(T), None);
        assert_eq!(tracker.record_failure(T), Some(HealthState::Unhealthy));
        assert!(!tracker.is_available());
        assert_eq!(tracker.record_failure(T), None);
    }

    #[test]
    fn success_resets_failure_streak() {
        let tracker = HealthTracker::new();
        tracker.record_failure(T);
        tracker.record_failure(T);
        tracker.record_success(T);
        assert_eq!(tracker.record_failure(T), None);
        assert_eq!(tracker.record_failure(T), None);
        assert!(tracker.is_available());
    }

    #[test]
    fn recovers_after_healthy_threshold() {
        let tracker = HealthTracker::new();
        for _ in 0..3 {
            tracker.record_failure(T);
        }
        assert_eq!(tracker.record_success(T), None);
        assert_eq!(tracker.record_success(T), Some(HealthState::Healthy));
        assert_eq!(tracker.state(), HealthState::Healthy);
    }

    #[test]
    fn unhealthy_gets_one_trial_per_cooldown() {
        let tracker = HealthTracker::new();
        assert!(!tracker.try_begin_trial(T.cooldown));
        for _ in 0..3 {
            tracker.record_failure(T);
        }
        assert!(!tracker.try_begin_trial(T.cooldown));

        std::thread::sleep(Duration::from_millis(30));
        assert!(tracker.try_begin_trial(T.cooldown));
        assert!(!tracker.try_begin_trial(T.cooldown));

        // A failed trial restarts the cooldown.
        tracker.record_failure(T);
        assert!(!tracker.try_begin_trial(T.cooldown));
        std::thread::sleep(Duration::from_millis(30));
        assert!(tracker.try_begin_trial(T.cooldown));

        // A successful trial opens the next one straight away.
        assert_eq!(tracker.record_success(T), None);
        assert!(tracker.try_begin_trial(T.cooldown));
        assert_eq!(tracker.record_success(T), Some(HealthState::Healthy));
        assert!(!tracker.try_begin_trial(T.cooldown));
    }
}
