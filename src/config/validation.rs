//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference known services)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Reject malformed route patterns and filter arguments
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;

use crate::config::schema::{FilterConfig, GatewayConfig, RouteConfig};
use crate::routing::predicate::{HostPattern, PathPattern};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("route #{0} has an empty id")]
    EmptyRouteId(usize),

    #[error("duplicate route id '{0}'")]
    DuplicateRouteId(String),

    #[error("route '{route}': {reason}")]
    InvalidPattern { route: String, reason: String },

    #[error("route '{route}': invalid method '{method}'")]
    InvalidMethod { route: String, method: String },

    #[error("route '{route}' targets unknown service '{service}'")]
    UnknownService { route: String, service: String },

    #[error("duplicate service '{0}'")]
    DuplicateService(String),

    #[error("service '{service}': {reason}")]
    InvalidInstance { service: String, reason: String },

    #[error("{location}: {reason}")]
    InvalidFilter { location: String, reason: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_ms"));
    }
    if config.timeouts.upstream_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.upstream_ms"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::Zero("retries.max_attempts"));
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::Zero("limits.max_body_bytes"));
    }
    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::Zero("health_check.interval_secs"));
        }
        if config.health_check.unhealthy_threshold == 0 {
            errors.push(ValidationError::Zero("health_check.unhealthy_threshold"));
        }
        if config.health_check.healthy_threshold == 0 {
            errors.push(ValidationError::Zero("health_check.healthy_threshold"));
        }
    }
    if config.discovery.enabled {
        if url::Url::parse(&config.discovery.endpoint).is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "discovery.endpoint",
                value: config.discovery.endpoint.clone(),
            });
        }
        if config.discovery.poll_interval_secs == 0 {
            errors.push(ValidationError::Zero("discovery.poll_interval_secs"));
        }
    }

    let mut services = HashSet::new();
    for service in &config.services {
        if !services.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        for instance in &service.instances {
            if instance.host.trim().is_empty() {
                errors.push(ValidationError::InvalidInstance {
                    service: service.name.clone(),
                    reason: "instance host is empty".to_string(),
                });
            }
            if instance.port == 0 {
                errors.push(ValidationError::InvalidInstance {
                    service: service.name.clone(),
                    reason: format!("instance {} has port 0", instance.host),
                });
            }
            if instance.weight == 0 {
                errors.push(ValidationError::InvalidInstance {
                    service: service.name.clone(),
                    reason: format!("instance {}:{} has weight 0", instance.host, instance.port),
                });
            }
            if instance.max_connections == 0 {
                errors.push(ValidationError::InvalidInstance {
                    service: service.name.clone(),
                    reason: format!(
                        "instance {}:{} has max_connections 0",
                        instance.host, instance.port
                    ),
                });
            }
        }
    }

    for (index, filter) in config.default_filters.iter().enumerate() {
        check_filter(&mut errors, format!("default_filters[{index}]"), filter);
    }

    let mut route_ids = HashSet::new();
    for (index, route) in config.routes.iter().enumerate() {
        if route.id.trim().is_empty() {
            errors.push(ValidationError::EmptyRouteId(index));
        } else if !route_ids.insert(route.id.as_str()) {
            errors.push(ValidationError::DuplicateRouteId(route.id.clone()));
        }

        check_route(&mut errors, route);

        // Discovery may supply services the static config does not list.
        if !config.discovery.enabled && !services.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                route: route.id.clone(),
                service: route.service.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_route(errors: &mut Vec<ValidationError>, route: &RouteConfig) {
    if let Err(e) = PathPattern::parse(&route.path) {
        errors.push(ValidationError::InvalidPattern {
            route: route.id.clone(),
            reason: e.to_string(),
        });
    }
    if let Some(host) = &route.host {
        if let Err(e) = HostPattern::parse(host) {
            errors.push(ValidationError::InvalidPattern {
                route: route.id.clone(),
                reason: e.to_string(),
            });
        }
    }
    for header in &route.headers {
        if HeaderName::from_bytes(header.name.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidPattern {
                route: route.id.clone(),
                reason: format!("invalid header name '{}'", header.name),
            });
        }
    }
    for method in &route.methods {
        if Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
            errors.push(ValidationError::InvalidMethod {
                route: route.id.clone(),
                method: method.clone(),
            });
        }
    }
    if route.timeout_ms == Some(0) {
        errors.push(ValidationError::InvalidPattern {
            route: route.id.clone(),
            reason: "timeout_ms must be greater than zero".to_string(),
        });
    }
    if route.max_attempts == Some(0) {
        errors.push(ValidationError::InvalidPattern {
            route: route.id.clone(),
            reason: "max_attempts must be greater than zero".to_string(),
        });
    }
    for (index, filter) in route.filters.iter().enumerate() {
        check_filter(errors, format!("route '{}' filters[{index}]", route.id), filter);
    }
}

fn check_filter(errors: &mut Vec<ValidationError>, location: String, filter: &FilterConfig) {
    let reason = match filter {
        FilterConfig::RateLimit { requests_per_second, burst } => {
            if *requests_per_second == 0 || *burst == 0 {
                Some("rate_limit requires requests_per_second and burst > 0".to_string())
            } else {
                None
            }
        }
        FilterConfig::RequireHeader { name, status, .. } => {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                Some(format!("invalid header name '{name}'"))
            } else if let Some(code) = status {
                match StatusCode::from_u16(*code) {
                    Ok(s) if s.is_client_error() || s.is_server_error() => None,
                    _ => Some(format!("require_header status {code} is not an error status")),
                }
            } else {
                None
            }
        }
        FilterConfig::AllowMethods { methods } => {
            if methods.is_empty() {
                Some("allow_methods requires at least one method".to_string())
            } else {
                methods
                    .iter()
                    .find(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).is_err())
                    .map(|m| format!("invalid method '{m}'"))
            }
        }
        FilterConfig::MaxBodySize { bytes } => {
            (*bytes == 0).then(|| "max_body_size requires bytes > 0".to_string())
        }
        FilterConfig::SetRequestHeader { name, value }
        | FilterConfig::SetResponseHeader { name, value } => {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                Some(format!("invalid header name '{name}'"))
            } else if HeaderValue::from_str(value).is_err() {
                Some(format!("invalid header value for '{name}'"))
            } else {
                None
            }
        }
        FilterConfig::RemoveRequestHeader { name }
        | FilterConfig::RemoveResponseHeader { name } => HeaderName::from_bytes(name.as_bytes())
            .is_err()
            .then(|| format!("invalid header name '{name}'")),
        FilterConfig::StripPrefix { segments } => {
            (*segments == 0).then(|| "strip_prefix requires segments > 0".to_string())
        }
    };

    if let Some(reason) = reason {
        errors.push(ValidationError::InvalidFilter { location, reason });
    }
}
