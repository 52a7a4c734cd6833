//! Backend pool management.
//!
//! # Responsibilities
//! - Manage backends grouped by service name
//! - Rebuild a group when the registry revision changes, keeping stats of
//!   instances that are still present
//! - Apply the service's policy to select a backend
//! - Send an unhealthy backend one trial request per cooldown
//! - Provide connection guards for tracking

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::config::schema::{LoadBalancingPolicy, ServiceConfig};
use crate::discovery::ServiceRegistry;
use crate::health::state::Thresholds;
use crate::load_balancer::{
    self,
    backend::{Backend, BackendConnectionGuard},
    LoadBalancer,
};

/// Backends of one service at one registry revision.
#[derive(Debug)]
pub struct ServiceGroup {
    pub revision: u64,
    pub policy: LoadBalancingPolicy,
    pub backends: Vec<Arc<Backend>>,
    balancer: Arc<dyn LoadBalancer>,
}

/// Manages backend groups and load balancing.
#[derive(Debug)]
pub struct BackendPool {
    registry: Arc<dyn ServiceRegistry>,
    policies: ArcSwap<HashMap<String, LoadBalancingPolicy>>,
    groups: DashMap<String, Arc<ServiceGroup>>,
    trial_cooldown_ms: AtomicU64,
}

impl BackendPool {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            registry,
            policies: ArcSwap::from_pointee(HashMap::new()),
            groups: DashMap::new(),
            trial_cooldown_ms: AtomicU64::new(Thresholds::default().cooldown.as_millis() as u64),
        }
    }

    /// How long an unhealthy backend waits between trial requests.
    pub fn set_trial_cooldown(&self, cooldown: Duration) {
        self.trial_cooldown_ms
            .store(cooldown.as_millis() as u64, Ordering::Relaxed);
    }

    fn trial_cooldown(&self) -> Duration {
        Duration::from_millis(self.trial_cooldown_ms.load(Ordering::Relaxed))
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// Install per-service policies from configuration.
    pub fn set_policies(&self, services: &[ServiceConfig]) {
        let policies = services
            .iter()
            .map(|s| (s.name.clone(), s.load_balancing))
            .collect();
        self.policies.store(Arc::new(policies));
    }

    fn policy_for(&self, service: &str) -> LoadBalancingPolicy {
        self.policies.load().get(service).copied().unwrap_or_default()
    }

    /// Current group for `service`, rebuilt if the registry or policy moved on.
    pub fn group(&self, service: &str) -> Arc<ServiceGroup> {
        let revision = self.registry.revision();
        let policy = self.policy_for(service);

        let previous = self.groups.get(service).map(|g| g.value().clone());
        if let Some(group) = &previous {
            if group.revision == revision && group.policy == policy {
                return group.clone();
            }
        }

        let group = Arc::new(self.rebuild(service, revision, policy, previous.as_deref()));
        self.groups.insert(service.to_string(), group.clone());
        group
    }

    fn rebuild(
        &self,
        service: &str,
        revision: u64,
        policy: LoadBalancingPolicy,
        previous: Option<&ServiceGroup>,
    ) -> ServiceGroup {
        let existing: HashMap<&str, &Arc<Backend>> = previous
            .map(|g| g.backends.iter().map(|b| (b.address.as_str(), b)).collect())
            .unwrap_or_default();

        let backends: Vec<Arc<Backend>> = self
            .registry
            .list_instances(service)
            .iter()
            .map(|instance| {
                let address = instance.address();
                match existing.get(address.as_str()) {
                    Some(b) if b.weight == instance.weight && b.max_connections == instance.max_connections => {
                        b.set_registry_up(instance.is_up());
                        Arc::clone(b)
                    }
                    _ => Arc::new(Backend::from_instance(instance)),
                }
            })
            .collect();

        let balancer = match previous {
            Some(g) if g.policy == policy => g.balancer.clone(),
            _ => Arc::from(load_balancer::build(policy)),
        };

        tracing::debug!(
            service,
            revision,
            backends = backends.len(),
            policy = ?policy,
            "Rebuilt backend group"
        );

        ServiceGroup {
            revision,
            policy,
            backends,
            balancer,
        }
    }

    /// Select a backend for `service`, preferring addresses not in `tried`.
    ///
    /// An unhealthy backend whose cooldown has elapsed takes this request as
    /// its trial. If no backend is available (all registry-down or locally
    /// unhealthy), registry-up backends are used anyway rather than failing
    /// outright. Returns a guard that decrements the connection count on drop.
    pub fn select(&self, service: &str, tried: &[String]) -> Option<BackendConnectionGuard> {
        let group = self.group(service);

        let cooldown = self.trial_cooldown();
        for backend in &group.backends {
            if backend.is_available() || tried.iter().any(|t| t == &backend.address) {
                continue;
            }
            if backend.try_begin_trial(cooldown) {
                if let Some(guard) = backend.try_create_guard() {
                    tracing::info!(service, backend = %backend.address, "Sending trial request to unhealthy backend");
                    return Some(guard);
                }
            }
        }

        let mut available: Vec<Arc<Backend>> =
            group.backends.iter().filter(|b| b.is_available()).cloned().collect();
        if available.is_empty() {
            available = group.backends.iter().filter(|b| b.is_registry_up()).cloned().collect();
            if !available.is_empty() {
                tracing::warn!(service, "All backends unhealthy, ignoring local health");
            }
        }

        let untried: Vec<Arc<Backend>> = available
            .iter()
            .filter(|b| !tried.iter().any(|t| t == &b.address))
            .cloned()
            .collect();
        let mut candidates = if untried.is_empty() { available } else { untried };

        while let Some(backend) = group.balancer.next_server(&candidates) {
            if let Some(guard) = backend.try_create_guard() {
                return Some(guard);
            }
            tracing::debug!(service, backend = %backend.address, "Backend at connection limit");
            candidates.retain(|b| !Arc::ptr_eq(b, &backend));
        }

        tracing::debug!(service, backend_count = group.backends.len(), "No backend available");
        None
    }

    /// Every backend of every known service (for health checking and admin).
    pub fn all_groups(&self) -> Vec<(String, Arc<ServiceGroup>)> {
        self.registry
            .services()
            .into_iter()
            .map(|name| {
                let group = self.group(&name);
                (name, group)
            })
            .collect()
    }

    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.all_groups()
            .into_iter()
            .flat_map(|(_, group)| group.backends.clone())
            .collect()
    }
}
