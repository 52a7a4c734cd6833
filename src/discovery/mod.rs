//! Service registry client.
//!
//! # Data Flow
//! ```text
//! static config (services section) ──┐
//!                                     ├─→ StaticRegistry (arc-swapped maps)
//! DiscoveryPoller (HTTP, periodic) ───┘        │
//!                                              ▼
//!                         BackendPool reads list_instances() when revision() changes
//! ```
//!
//! # Design Decisions
//! - Reads never block: both maps live behind `ArcSwap`
//! - Discovered instances shadow static ones for the same service
//! - A failed poll keeps the last known instance list

pub mod poller;
pub mod registry;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::schema::InstanceConfig;

pub use poller::DiscoveryPoller;
pub use registry::StaticRegistry;

/// Registry-reported status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    /// Taking no new traffic (e.g. during deploy).
    OutOfService,
}

/// One instance of a service as the registry knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: usize,
    pub status: InstanceStatus,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == InstanceStatus::Up
    }

    pub fn from_config(service: &str, config: &InstanceConfig) -> Self {
        Self {
            id: format!("{}-{}:{}", service, config.host, config.port),
            host: config.host.clone(),
            port: config.port,
            weight: config.weight,
            max_connections: config.max_connections,
            status: InstanceStatus::Up,
            metadata: config.metadata.clone(),
        }
    }
}

/// Source of live instance lists per service name.
pub trait ServiceRegistry: Send + Sync + fmt::Debug {
    /// Current instances of `service`. Unknown services yield an empty list.
    fn list_instances(&self, service: &str) -> Vec<ServiceInstance>;

    /// Changes whenever any instance list changes.
    fn revision(&self) -> u64;

    /// Names of every known service.
    fn services(&self) -> Vec<String>;
}
