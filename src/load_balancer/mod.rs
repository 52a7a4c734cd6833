//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → pool.rs (backends of the service, rebuilt on registry change)
//!     → filter out unavailable and already-tried backends
//!     → Apply the service's policy:
//!         - round_robin.rs (rotate through backends)
//!         - weighted.rs (rotate proportionally to weight)
//!         - least_conn.rs (fewest in-flight, then lowest latency)
//!     → backend.rs (acquire connection guard)
//! ```
//!
//! # Design Decisions
//! - Policies only choose among the candidates they are given
//! - Backend stats live on `Backend` and survive registry refreshes
//! - Stats are advisory; relaxed atomics are enough

use std::fmt::Debug;
use std::sync::Arc;

use crate::config::schema::LoadBalancingPolicy;

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod weighted;

pub use backend::{Backend, BackendConnectionGuard};
pub use pool::BackendPool;

/// Instance selection policy.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one of `backends`, or `None` if the slice is empty.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Instantiate the policy configured for a service.
pub fn build(policy: LoadBalancingPolicy) -> Box<dyn LoadBalancer> {
    match policy {
        LoadBalancingPolicy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        LoadBalancingPolicy::Weighted => Box::new(weighted::Weighted::new()),
        LoadBalancingPolicy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
    }
}
