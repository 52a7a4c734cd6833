//! Versioned route table.
//!
//! # Responsibilities
//! - Hold the active route snapshot behind an atomic pointer
//! - Compile and publish a new snapshot as one unit
//! - Serve lock-free lookups against whichever snapshot is current
//!
//! # Design Decisions
//! - Readers load an `Arc<RouteSnapshot>` and keep it for the whole request
//! - A publish either swaps in a complete snapshot or changes nothing
//! - Publishers are serialized so versions are strictly increasing

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::ArcSwap;

use crate::config::schema::{FilterConfig, RouteConfig};
use crate::config::validation::ValidationError;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::routing::matcher;
use crate::routing::predicate::RequestHead;
use crate::routing::route::Route;

/// Immutable point-in-time view of the route table.
#[derive(Debug)]
pub struct RouteSnapshot {
    pub version: u64,
    pub published_at: SystemTime,
    /// Routes in evaluation order.
    routes: Vec<Arc<Route>>,
}

impl RouteSnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            published_at: SystemTime::now(),
            routes: Vec::new(),
        }
    }

    /// Best matching route. Pure: no side effects, same input same output.
    pub fn lookup(&self, head: &RequestHead<'_>) -> Option<&Arc<Route>> {
        matcher::best_match(&self.routes, head)
    }

    /// Routes in evaluation order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Compiled, ranked routes that have not been published yet.
#[derive(Debug)]
pub struct CompiledRoutes(Vec<Arc<Route>>);

impl CompiledRoutes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The active route table.
#[derive(Debug)]
pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
    publish_lock: Mutex<()>,
}

impl RouteTable {
    /// An empty table at version 0.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::empty()),
            publish_lock: Mutex::new(()),
        }
    }

    /// Compile and rank a route set without publishing it.
    pub fn compile(
        routes: &[RouteConfig],
        default_filters: &[FilterConfig],
    ) -> Result<CompiledRoutes, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(routes.len());

        for (order, config) in routes.iter().enumerate() {
            if !seen.insert(config.id.as_str()) {
                errors.push(ValidationError::DuplicateRouteId(config.id.clone()));
                continue;
            }
            match Route::compile(order, config, default_filters) {
                Ok(route) => compiled.push(Arc::new(route)),
                Err(mut e) => errors.append(&mut e),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        matcher::rank(&mut compiled);
        Ok(CompiledRoutes(compiled))
    }

    /// Swap in a compiled route set. Returns the new version.
    pub fn install(&self, routes: CompiledRoutes) -> u64 {
        let _guard = self
            .publish_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let version = self.current.load().version + 1;
        self.current.store(Arc::new(RouteSnapshot {
            version,
            published_at: SystemTime::now(),
            routes: routes.0,
        }));
        metrics::record_route_table_version(version);
        version
    }

    /// Validate, compile and atomically publish a new route set.
    ///
    /// On error the active snapshot is left untouched.
    pub fn publish(
        &self,
        routes: &[RouteConfig],
        default_filters: &[FilterConfig],
    ) -> Result<u64, GatewayError> {
        let compiled = Self::compile(routes, default_filters).map_err(GatewayError::ConfigInvalid)?;
        let count = compiled.len();
        let version = self.install(compiled);
        tracing::info!(version, routes = count, "Route table published");
        Ok(version)
    }

    /// The current snapshot. Callers should hold it for the duration of a request.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Convenience lookup against the current snapshot.
    pub fn lookup(&self, head: &RequestHead<'_>) -> Option<Arc<Route>> {
        self.current.load().lookup(head).cloned()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
