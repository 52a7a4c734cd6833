//! Shared gateway state and configuration reloads.
//!
//! # Responsibilities
//! - Own the route table, registry, backend pool and dispatcher
//! - Apply a new configuration as a unit, or not at all
//!
//! # Design Decisions
//! - Everything is validated and compiled before anything is swapped
//! - Listener, admin, health check and discovery poller changes need a restart;
//!   they are reported, not applied
//! - Rate limiter state starts fresh with every published snapshot

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::loader::{load_config, ConfigError};
use crate::config::validation::validate_config;
use crate::config::GatewayConfig;
use crate::discovery::StaticRegistry;
use crate::dispatch::{Dispatcher, HttpUpstream, Upstream};
use crate::error::GatewayError;
use crate::load_balancer::BackendPool;
use crate::resilience::Deadlines;
use crate::routing::RouteTable;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("no configuration file to reload from")]
    NoConfigPath,

    #[error(transparent)]
    Load(#[from] ConfigError),

    #[error(transparent)]
    Rejected(#[from] GatewayError),
}

#[derive(Debug)]
pub struct GatewayState {
    pub routes: RouteTable,
    pub registry: Arc<StaticRegistry>,
    pub pool: Arc<BackendPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: Instant,
    pub request_count: AtomicU64,
    config: ArcSwap<GatewayConfig>,
    discovery_services: Arc<ArcSwap<Vec<String>>>,
    config_path: Option<PathBuf>,
    reload_lock: Mutex<()>,
}

impl GatewayState {
    /// Build state with the default hyper upstream client.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let connect = Deadlines::from_config(&config.timeouts).connect;
        Self::with_upstream(config, Arc::new(HttpUpstream::new(connect)))
    }

    /// Build state around a given upstream client.
    pub fn with_upstream(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Result<Self, GatewayError> {
        validate_config(&config).map_err(GatewayError::ConfigInvalid)?;
        let compiled = RouteTable::compile(&config.routes, &config.default_filters)
            .map_err(GatewayError::ConfigInvalid)?;

        let registry = Arc::new(StaticRegistry::from_config(&config.services));
        let pool = Arc::new(BackendPool::new(registry.clone()));
        pool.set_policies(&config.services);
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), upstream, &config));

        let routes = RouteTable::new();
        let version = routes.install(compiled);
        tracing::info!(version, routes = config.routes.len(), services = config.services.len(), "Gateway initialized");

        Ok(Self {
            routes,
            registry,
            pool,
            dispatcher,
            started_at: Instant::now(),
            request_count: AtomicU64::new(0),
            discovery_services: Arc::new(ArcSwap::from_pointee(discovery_services(&config))),
            config: ArcSwap::from_pointee(config),
            config_path: None,
            reload_lock: Mutex::new(()),
        })
    }

    /// Remember where the configuration came from, for reloads.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    /// Services the discovery poller should ask about.
    pub fn discovery_services(&self) -> Arc<ArcSwap<Vec<String>>> {
        self.discovery_services.clone()
    }

    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Validate and apply `config`. On error nothing changes.
    ///
    /// Returns the new route table version.
    pub fn apply_config(&self, config: GatewayConfig) -> Result<u64, GatewayError> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Err(errors) = validate_config(&config) {
            tracing::error!(errors = errors.len(), "Configuration rejected, keeping previous routes");
            return Err(GatewayError::ConfigInvalid(errors));
        }
        let compiled = match RouteTable::compile(&config.routes, &config.default_filters) {
            Ok(compiled) => compiled,
            Err(errors) => {
                tracing::error!(errors = errors.len(), "Routes failed to compile, keeping previous routes");
                return Err(GatewayError::ConfigInvalid(errors));
            }
        };

        let previous = self.config.load_full();
        for section in restart_required(&previous, &config) {
            tracing::warn!(section, "Settings changed; restart required to apply them");
        }

        self.registry.replace_configured(&config.services);
        self.pool.set_policies(&config.services);
        self.dispatcher.reconfigure(&config);
        self.discovery_services.store(Arc::new(discovery_services(&config)));
        let version = self.routes.install(compiled);
        tracing::info!(version, routes = config.routes.len(), "Configuration applied");
        self.config.store(Arc::new(config));

        Ok(version)
    }

    /// Re-read the configuration file and apply it.
    pub fn reload_from_disk(&self) -> Result<u64, ReloadError> {
        let path = self.config_path.as_deref().ok_or(ReloadError::NoConfigPath)?;
        let config = match load_config(path) {
            Ok(config) => config,
            Err(ConfigError::Validation(errors)) => {
                tracing::error!(path = %path.display(), errors = errors.len(), "Reloaded configuration is invalid");
                return Err(GatewayError::ConfigInvalid(errors).into());
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to reload configuration");
                return Err(e.into());
            }
        };
        Ok(self.apply_config(config)?)
    }
}

/// Sections whose changes only take effect after a restart.
///
/// The listener, admin server, health monitor and discovery poller are
/// started once with the configuration they were given.
fn restart_required(previous: &GatewayConfig, next: &GatewayConfig) -> Vec<&'static str> {
    let mut sections = Vec::new();
    if previous.listener.bind_address != next.listener.bind_address
        || previous.listener.max_connections != next.listener.max_connections
    {
        sections.push("listener");
    }
    if previous.admin.bind_address != next.admin.bind_address || previous.admin.enabled != next.admin.enabled {
        sections.push("admin");
    }
    // Thresholds and the recovery cooldown are picked up by the dispatcher.
    let health_checks = |c: &GatewayConfig| {
        (
            c.health_check.enabled,
            c.health_check.interval_secs,
            c.health_check.timeout_secs,
            c.health_check.path.clone(),
        )
    };
    if health_checks(previous) != health_checks(next) {
        sections.push("health_check");
    }
    if previous.discovery.enabled != next.discovery.enabled
        || previous.discovery.endpoint != next.discovery.endpoint
        || previous.discovery.poll_interval_secs != next.discovery.poll_interval_secs
    {
        sections.push("discovery");
    }
    sections
}

/// Explicit discovery list, or every service a route targets.
fn discovery_services(config: &GatewayConfig) -> Vec<String> {
    if !config.discovery.services.is_empty() {
        return config.discovery.services.clone();
    }
    config
        .routes
        .iter()
        .map(|r| r.service.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::routing::RequestHead;
    use axum::http::Request;

    const BASE: &str = r#"
        [[services]]
        name = "orders"
        instances = [{ host = "127.0.0.1", port = 9001 }]

        [[services]]
        name = "catalog"
        instances = [{ host = "127.0.0.1", port = 9002 }]

        [[routes]]
        id = "orders"
        path = "/api/orders/*"
        service = "orders"

        [[routes]]
        id = "fallback"
        path = "/*"
        service = "catalog"
    "#;

    fn route_for(state: &GatewayState, path: &str) -> Option<String> {
        let request = Request::get(path).body(()).unwrap();
        state
            .routes
            .lookup(&RequestHead::from_request(&request))
            .map(|r| r.id.clone())
    }

    #[test]
    fn specific_route_wins_over_catch_all() {
        let state = GatewayState::new(parse_config(BASE).unwrap()).unwrap();
        assert_eq!(route_for(&state, "/api/orders/123").as_deref(), Some("orders"));
        assert_eq!(route_for(&state, "/anything").as_deref(), Some("fallback"));
    }

    #[test]
    fn invalid_reload_keeps_previous_snapshot() {
        let state = GatewayState::new(parse_config(BASE).unwrap()).unwrap();
        let before = state.routes.snapshot();

        let mut broken: GatewayConfig = toml::from_str(BASE).unwrap();
        broken.routes[0].service = "missing".to_string();
        broken.routes[1].path = "no-leading-slash".to_string();

        match state.apply_config(broken) {
            Err(GatewayError::ConfigInvalid(errors)) => assert!(errors.len() >= 2),
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
        assert!(Arc::ptr_eq(&before, &state.routes.snapshot()));
        assert_eq!(state.config().routes[0].service, "orders");
    }

    #[test]
    fn valid_reload_swaps_routes_and_services() {
        let state = GatewayState::new(parse_config(BASE).unwrap()).unwrap();
        let version = state.routes.version();

        let mut next: GatewayConfig = toml::from_str(BASE).unwrap();
        next.routes.remove(1);
        next.services[0].instances[0].port = 9100;

        assert_eq!(state.apply_config(next).unwrap(), version + 1);
        assert_eq!(route_for(&state, "/anything"), None);
        assert_eq!(state.pool.group("orders").backends[0].address, "127.0.0.1:9100");
        assert_eq!(*state.discovery_services().load_full(), vec!["orders".to_string()]);
    }

    #[test]
    fn restart_required_names_changed_sections() {
        let base: GatewayConfig = toml::from_str(BASE).unwrap();
        assert!(restart_required(&base, &base).is_empty());

        let mut next = base.clone();
        next.health_check.interval_secs += 5;
        next.health_check.unhealthy_threshold += 1;
        next.discovery.endpoint = "http://registry.internal:8761".to_string();
        next.discovery.services = vec!["orders".to_string()];
        assert_eq!(restart_required(&base, &next), vec!["health_check", "discovery"]);

        // Applied live: thresholds and the polled service list.
        let mut live = base.clone();
        live.health_check.unhealthy_threshold += 1;
        live.discovery.services = vec!["orders".to_string()];
        assert!(restart_required(&base, &live).is_empty());

        let mut listener = base.clone();
        listener.listener.bind_address = "127.0.0.1:9999".to_string();
        assert_eq!(restart_required(&base, &listener), vec!["listener"]);
    }

    #[test]
    fn reload_without_path_is_an_error() {
        let state = GatewayState::new(parse_config(BASE).unwrap()).unwrap();
        assert!(matches!(state.reload_from_disk(), Err(ReloadError::NoConfigPath)));
    }
}
