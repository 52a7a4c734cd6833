//! Compiled route definitions.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};

use crate::config::schema::{FilterConfig, RouteConfig};
use crate::config::validation::ValidationError;
use crate::filters::{Filter, FilterChain};
use crate::routing::predicate::{
    HeaderMatcher, HostPattern, PathPattern, RoutePredicate, Specificity,
};

/// A route ready for matching. Immutable once published in a snapshot.
#[derive(Debug)]
pub struct Route {
    pub id: String,
    pub predicate: RoutePredicate,
    /// Target service name.
    pub service: String,
    /// Default filters followed by the route's own filters.
    pub filters: FilterChain,
    pub priority: i32,
    pub specificity: Specificity,
    /// Declaration index, used to break ranking ties.
    pub order: usize,
    /// Per-attempt upstream timeout override.
    pub timeout: Option<Duration>,
    /// Total attempt override.
    pub max_attempts: Option<u32>,
}

impl Route {
    /// Compile a route from configuration, reporting every problem found.
    pub fn compile(
        order: usize,
        config: &RouteConfig,
        default_filters: &[FilterConfig],
    ) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let invalid = |reason: String| ValidationError::InvalidPattern {
            route: config.id.clone(),
            reason,
        };

        let path = PathPattern::parse(&config.path).map_err(|e| invalid(e.to_string()));

        let host = match config.host.as_deref().map(HostPattern::parse) {
            Some(Ok(h)) => Some(h),
            Some(Err(e)) => {
                errors.push(invalid(e.to_string()));
                None
            }
            None => None,
        };

        let mut headers = Vec::with_capacity(config.headers.len());
        for h in &config.headers {
            let name = match HeaderName::from_bytes(h.name.as_bytes()) {
                Ok(n) => n,
                Err(_) => {
                    errors.push(invalid(format!("invalid header name '{}'", h.name)));
                    continue;
                }
            };
            let value = match h.value.as_deref().map(HeaderValue::from_str) {
                Some(Ok(v)) => Some(v),
                Some(Err(_)) => {
                    errors.push(invalid(format!("invalid value for header '{}'", h.name)));
                    continue;
                }
                None => None,
            };
            headers.push(HeaderMatcher { name, value });
        }

        let mut methods = Vec::with_capacity(config.methods.len());
        for m in &config.methods {
            match Method::from_bytes(m.to_ascii_uppercase().as_bytes()) {
                Ok(method) => methods.push(method),
                Err(_) => errors.push(ValidationError::InvalidMethod {
                    route: config.id.clone(),
                    method: m.clone(),
                }),
            }
        }

        let mut filters = Vec::with_capacity(default_filters.len() + config.filters.len());
        for (location, filter) in default_filters
            .iter()
            .enumerate()
            .map(|(i, f)| (format!("default_filters[{i}]"), f))
            .chain(
                config
                    .filters
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (format!("route '{}' filters[{i}]", config.id), f)),
            )
        {
            match Filter::from_config(filter) {
                Ok(f) => filters.push(f),
                Err(reason) => errors.push(ValidationError::InvalidFilter { location, reason }),
            }
        }

        let path = match path {
            Ok(p) => p,
            Err(e) => {
                errors.push(e);
                return Err(errors);
            }
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let predicate = RoutePredicate {
            path,
            host,
            headers,
            methods,
        };
        let specificity = predicate.specificity();

        Ok(Self {
            id: config.id.clone(),
            predicate,
            service: config.service.clone(),
            filters: FilterChain::new(filters),
            priority: config.priority,
            specificity,
            order,
            timeout: config.timeout_ms.map(Duration::from_millis),
            max_attempts: config.max_attempts,
        })
    }
}
