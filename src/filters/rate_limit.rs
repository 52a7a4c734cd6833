//! Token bucket rate limiting, keyed by client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Buckets idle this long are dropped when the map grows too large.
const IDLE_EVICTION: Duration = Duration::from_secs(60);
const MAX_TRACKED_CLIENTS: usize = 100_000;
/// At most one eviction sweep per interval.
const EVICTION_INTERVAL: Duration = Duration::from_secs(10);

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-client token buckets sharing one rate and burst.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rate: f64,
    burst: f64,
    max_tracked: usize,
    idle_after: Duration,
    origin: Instant,
    next_eviction_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self::with_eviction(requests_per_second, burst, MAX_TRACKED_CLIENTS, IDLE_EVICTION)
    }

    fn with_eviction(requests_per_second: u32, burst: u32, max_tracked: usize, idle_after: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            rate: requests_per_second as f64,
            burst: burst as f64,
            max_tracked,
            idle_after,
            origin: Instant::now(),
            next_eviction_ms: AtomicU64::new(0),
        }
    }

    /// Take one token for `key`. Returns false when the client is over its limit.
    pub fn check(&self, key: &str) -> bool {
        if self.buckets.len() > self.max_tracked && self.claim_eviction() {
            self.evict_idle();
        }

        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return bucket.try_acquire(self.burst, self.rate);
        }

        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rate)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    /// True for the one caller allowed to sweep in this interval.
    fn claim_eviction(&self) -> bool {
        let now = self.origin.elapsed().as_millis() as u64;
        let due = self.next_eviction_ms.load(Ordering::Relaxed);
        now >= due
            && self
                .next_eviction_ms
                .compare_exchange(
                    due,
                    now + EVICTION_INTERVAL.as_millis() as u64,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
    }

    fn evict_idle(&self) {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < self.idle_after);
        tracing::debug!(before, after = self.buckets.len(), "Evicted idle rate limit buckets");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject() {
        let limiter = RateLimiter::new(1, 3);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));

        // Other clients have their own bucket.
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(50, 1);
        assert!(limiter.check("c"));
        assert!(!limiter.check("c"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("c"));
    }

    #[test]
    fn eviction_sweeps_at_most_once_per_interval() {
        let limiter = RateLimiter::with_eviction(1, 1, 2, Duration::ZERO);
        for key in ["a", "b", "c"] {
            limiter.check(key);
        }
        assert_eq!(limiter.tracked_clients(), 3);

        // Over the cap: one sweep drops every idle bucket.
        limiter.check("d");
        assert_eq!(limiter.tracked_clients(), 1);

        // Still over the cap, but the next sweep is not due yet.
        for key in ["e", "f", "g"] {
            limiter.check(key);
        }
        assert_eq!(limiter.tracked_clients(), 4);
    }
}
