//! Per-request scratch state.
//!
//! # State Machine
//! ```text
//! Matching → NoMatch
//!          → Matched → Rejected
//!                    → Dispatching → Success
//!                                  → Retrying → Dispatching
//!                                  → Exhausted
//! ```
//!
//! A context is created when a request enters the gateway and dropped when
//! the response is complete. It is never shared between requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::routing::Route;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Matching,
    NoMatch,
    Matched,
    /// A pre-phase filter short-circuited.
    Rejected,
    Dispatching,
    Retrying,
    Success,
    Exhausted,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPhase::Matching => "matching",
            RequestPhase::NoMatch => "no_match",
            RequestPhase::Matched => "matched",
            RequestPhase::Rejected => "rejected",
            RequestPhase::Dispatching => "dispatching",
            RequestPhase::Retrying => "retrying",
            RequestPhase::Success => "success",
            RequestPhase::Exhausted => "exhausted",
        }
    }

    fn can_enter(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Matching, NoMatch)
                | (Matching, Matched)
                | (Matched, Rejected)
                | (Matched, Dispatching)
                | (Matched, Exhausted)
                | (Dispatching, Success)
                | (Dispatching, Retrying)
                | (Dispatching, Exhausted)
                | (Retrying, Dispatching)
                | (Retrying, Exhausted)
        )
    }
}

/// Mutable per-request state shared by the filter chain and dispatcher.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub client_addr: Option<SocketAddr>,
    pub received_at: Instant,
    /// Version of the route snapshot used for matching.
    pub snapshot_version: u64,
    route: Option<Arc<Route>>,
    phase: RequestPhase,
    instance: Option<String>,
    attempts: u32,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, client_addr: Option<SocketAddr>) -> Self {
        Self {
            request_id: request_id.into(),
            client_addr,
            received_at: Instant::now(),
            snapshot_version: 0,
            route: None,
            phase: RequestPhase::Matching,
            instance: None,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// Move to the next phase. Out-of-order transitions are logged and ignored.
    pub fn enter(&mut self, next: RequestPhase) {
        if self.phase.can_enter(next) {
            tracing::trace!(
                request_id = %self.request_id,
                from = self.phase.as_str(),
                to = next.as_str(),
                "Request phase"
            );
            self.phase = next;
        } else {
            tracing::debug!(
                request_id = %self.request_id,
                from = self.phase.as_str(),
                to = next.as_str(),
                "Ignoring invalid phase transition"
            );
        }
    }

    /// Record the matched route.
    pub fn set_route(&mut self, route: Arc<Route>) {
        self.route = Some(route);
        self.enter(RequestPhase::Matched);
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// Record the start of an attempt against `instance`.
    pub fn begin_attempt(&mut self, instance: impl Into<String>) {
        self.attempts += 1;
        self.instance = Some(instance.into());
        self.enter(RequestPhase::Dispatching);
    }

    /// Address of the instance used by the latest attempt.
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Key used for per-client limits.
    pub fn client_key(&self) -> String {
        self.client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_retry_cycle() {
        let mut ctx = RequestContext::new("req-1", None);
        ctx.enter(RequestPhase::Matched);
        ctx.begin_attempt("10.0.0.1:80");
        ctx.enter(RequestPhase::Retrying);
        ctx.begin_attempt("10.0.0.2:80");
        ctx.enter(RequestPhase::Success);

        assert_eq!(ctx.phase(), RequestPhase::Success);
        assert_eq!(ctx.attempts(), 2);
        assert_eq!(ctx.instance(), Some("10.0.0.2:80"));
    }

    #[test]
    fn rejects_invalid_transitions() {
        let mut ctx = RequestContext::new("req-2", None);
        ctx.enter(RequestPhase::Success);
        assert_eq!(ctx.phase(), RequestPhase::Matching);

        ctx.enter(RequestPhase::NoMatch);
        ctx.enter(RequestPhase::Dispatching);
        assert_eq!(ctx.phase(), RequestPhase::NoMatch);
    }

    #[test]
    fn client_key_uses_ip() {
        let ctx = RequestContext::new("req-3", Some("192.168.1.7:5555".parse().unwrap()));
        assert_eq!(ctx.client_key(), "192.168.1.7");
        assert_eq!(RequestContext::new("r", None).client_key(), "unknown");
    }
}
