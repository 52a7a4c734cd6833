//! Weighted round-robin load balancing strategy.
//!
//! Deterministic: over any window of `sum(weights)` consecutive picks on an
//! unchanged candidate set, each backend is chosen exactly `weight` times.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

#[derive(Debug, Default)]
pub struct Weighted {
    counter: AtomicU64,
}

impl Weighted {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for Weighted {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let total: u64 = backends.iter().map(|b| u64::from(b.weight.max(1))).sum();
        if total == 0 {
            return None;
        }

        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for backend in backends {
            let weight = u64::from(backend.weight.max(1));
            if slot < weight {
                return Some(backend.clone());
            }
            slot -= weight;
        }
        backends.last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_proportionally_to_weight() {
        let lb = Weighted::new();
        let heavy = Arc::new(Backend::new("heavy", "10.0.0.1:80", 3, 100));
        let light = Arc::new(Backend::new("light", "10.0.0.2:80", 1, 100));
        let backends = vec![heavy.clone(), light.clone()];

        let heavy_picks = (0..40)
            .filter(|_| lb.next_server(&backends).unwrap().id == "heavy")
            .count();
        assert_eq!(heavy_picks, 30);
    }
}
