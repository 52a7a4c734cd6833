//! Timeout enforcement.
//!
//! # Responsibilities
//! - Resolve connect and per-attempt upstream deadlines
//! - Apply route-level overrides
//!
//! The overall inbound request deadline is enforced by `TimeoutLayer` on
//! the HTTP router; these deadlines bound single upstream attempts.

use std::time::Duration;

use crate::config::schema::TimeoutConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub connect: Duration,
    pub upstream: Duration,
}

impl Deadlines {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_ms),
            upstream: Duration::from_millis(config.upstream_ms),
        }
    }

    /// Per-attempt deadline for a route, honoring its override.
    pub fn upstream_for(&self, route_override: Option<Duration>) -> Duration {
        route_override.unwrap_or(self.upstream)
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}
