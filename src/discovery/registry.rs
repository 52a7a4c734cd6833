//! In-memory registry fed by configuration and pushed updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::ServiceConfig;
use crate::discovery::{ServiceInstance, ServiceRegistry};

type InstanceMap = HashMap<String, Arc<Vec<ServiceInstance>>>;

/// Registry backed by config plus pushed updates.
#[derive(Debug)]
pub struct StaticRegistry {
    configured: ArcSwap<InstanceMap>,
    discovered: ArcSwap<InstanceMap>,
    revision: AtomicU64,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self {
            configured: ArcSwap::from_pointee(HashMap::new()),
            discovered: ArcSwap::from_pointee(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let registry = Self::new();
        registry.replace_configured(services);
        registry
    }

    /// Replace every statically configured service (config reload).
    pub fn replace_configured(&self, services: &[ServiceConfig]) {
        let map: InstanceMap = services
            .iter()
            .map(|s| {
                let instances = s
                    .instances
                    .iter()
                    .map(|i| ServiceInstance::from_config(&s.name, i))
                    .collect();
                (s.name.clone(), Arc::new(instances))
            })
            .collect();
        self.configured.store(Arc::new(map));
        self.bump();
    }

    /// Push a discovered instance list for one service.
    ///
    /// No-op (and no revision bump) when the list is unchanged.
    pub fn update_service(&self, service: &str, instances: Vec<ServiceInstance>) -> bool {
        let unchanged = self
            .discovered
            .load()
            .get(service)
            .map(|current| current.as_slice() == instances.as_slice())
            .unwrap_or(false);
        if unchanged {
            return false;
        }

        let instances = Arc::new(instances);
        self.discovered.rcu(|current| {
            let mut next = InstanceMap::clone(current);
            next.insert(service.to_string(), instances.clone());
            next
        });
        self.bump();
        tracing::info!(service, instances = instances.len(), "Service instances updated");
        true
    }

    /// Forget discovered instances of a service, falling back to config.
    pub fn remove_discovered(&self, service: &str) {
        if !self.discovered.load().contains_key(service) {
            return;
        }
        self.discovered.rcu(|current| {
            let mut next = InstanceMap::clone(current);
            next.remove(service);
            next
        });
        self.bump();
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry for StaticRegistry {
    fn list_instances(&self, service: &str) -> Vec<ServiceInstance> {
        if let Some(found) = self.discovered.load().get(service) {
            return found.as_ref().clone();
        }
        self.configured
            .load()
            .get(service)
            .map(|found| found.as_ref().clone())
            .unwrap_or_default()
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .configured
            .load()
            .keys()
            .chain(self.discovered.load().keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
