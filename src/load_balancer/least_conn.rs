//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least connections selector.
/// Selects the backend with the fewest in-flight requests; ties go to the
/// lower latency EWMA, then to the earlier backend.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // min_by_key keeps the first minimum, which gives declaration order on ties.
        backends
            .iter()
            .min_by_key(|b| (b.active(), b.latency_micros()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let b1 = Arc::new(Backend::new("b1", "127.0.0.1:8080", 1, 100));
        let b2 = Arc::new(Backend::new("b2", "127.0.0.1:8081", 1, 100));
        let backends = vec![b1.clone(), b2.clone()];

        let _g1 = b1.try_create_guard().unwrap();
        assert_eq!(lb.next_server(&backends).unwrap().id, "b2");

        let _g2 = b2.try_create_guard().unwrap();
        let _g3 = b2.try_create_guard().unwrap();
        assert_eq!(lb.next_server(&backends).unwrap().id, "b1");
    }

    #[test]
    fn ties_prefer_lower_latency_then_order() {
        let lb = LeastConnections::new();
        let slow = Arc::new(Backend::new("slow", "127.0.0.1:8080", 1, 100));
        let fast = Arc::new(Backend::new("fast", "127.0.0.1:8081", 1, 100));
        let backends = vec![slow.clone(), fast.clone()];

        // No samples yet: first declared wins.
        assert_eq!(lb.next_server(&backends).unwrap().id, "slow");

        slow.record_latency(Duration::from_millis(40));
        fast.record_latency(Duration::from_millis(5));
        assert_eq!(lb.next_server(&backends).unwrap().id, "fast");
    }
}
