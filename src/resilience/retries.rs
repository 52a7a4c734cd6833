//! Retry logic.
//!
//! # Responsibilities
//! - Classify attempt failures as retryable or final
//! - Compute exponential backoff with jitter
//! - Enforce a retry budget (retries per window relative to requests)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use rand::Rng;

use crate::config::schema::RetryConfig;

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Could not establish a connection; the backend never saw the request.
    Connect,
    /// The per-attempt deadline elapsed.
    Timeout,
    /// The request was sent but the exchange failed.
    Request,
    /// The backend answered with a status that signals unavailability.
    Status(StatusCode),
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connect => "connect",
            FailureKind::Timeout => "timeout",
            FailureKind::Request => "request",
            FailureKind::Status(_) => "status",
        }
    }
}

/// Statuses that mark the backend, not the request, as the problem.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Retry parameters resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_non_idempotent: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: if config.enabled { config.max_attempts.max(1) } else { 1 },
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retry_non_idempotent: config.retry_non_idempotent,
        }
    }

    /// Same policy with a different attempt bound.
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// Whether `failure` on a `method` request may be attempted again.
    pub fn is_retryable(&self, method: &Method, failure: FailureKind) -> bool {
        match failure {
            FailureKind::Connect => true,
            FailureKind::Status(status) if !is_transient_status(status) => false,
            FailureKind::Timeout | FailureKind::Request | FailureKind::Status(_) => {
                method.is_idempotent() || self.retry_non_idempotent
            }
        }
    }

    /// Delay before the next attempt, after `failed` attempts so far.
    ///
    /// Exponential from `base_delay`, capped at `max_delay`, plus up to 10%
    /// jitter.
    pub fn backoff(&self, failed: u32) -> Duration {
        if failed == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let exponential = 2u64.saturating_pow(failed - 1);
        let capped = base_ms.saturating_mul(exponential).min(max_ms);

        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Caps retries to `min_retries + ratio * requests` per window.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u32,
    window: Duration,
    origin: Instant,
    epoch: AtomicU64,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl RetryBudget {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

    pub fn new(ratio: f32, min_retries: u32, window: Duration) -> Self {
        Self {
            ratio: ratio.max(0.0),
            min_retries,
            window: window.max(Duration::from_millis(1)),
            origin: Instant::now(),
            epoch: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// The configured budget, or `None` when retries are not budgeted.
    pub fn from_config(config: &RetryConfig) -> Option<Self> {
        config
            .budget_enabled
            .then(|| Self::new(config.budget_ratio, config.budget_min_retries, Self::DEFAULT_WINDOW))
    }

    /// Start a fresh window if the current one has elapsed.
    fn roll(&self) {
        let now = (self.origin.elapsed().as_millis() / self.window.as_millis()) as u64;
        let current = self.epoch.load(Ordering::Relaxed);
        if now != current
            && self
                .epoch
                .compare_exchange(current, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.requests.store(0, Ordering::Relaxed);
            self.retries.store(0, Ordering::Relaxed);
        }
    }

    /// Count an incoming request toward the budget.
    pub fn record_request(&self) {
        self.roll();
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve one retry. Returns false when the budget is spent.
    pub fn try_acquire(&self) -> bool {
        self.roll();
        let requests = self.requests.load(Ordering::Relaxed);
        let allowed = u64::from(self.min_retries) + (requests as f64 * f64::from(self.ratio)) as u64;
        self.retries
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                (used < allowed).then_some(used + 1)
            })
            .is_ok()
    }
}
