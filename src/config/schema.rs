//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Route definitions mapping requests to services.
    pub routes: Vec<RouteConfig>,

    /// Statically known services and their instances.
    pub services: Vec<ServiceConfig>,

    /// Filters prepended to every route's own filter list.
    pub default_filters: Vec<FilterConfig>,

    /// Service registry client settings.
    pub discovery: DiscoveryConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Route configuration mapping a request predicate to a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub id: String,

    /// Path pattern, e.g. `/api/orders/*`.
    pub path: String,

    /// Host pattern: exact (`api.example.com`) or wildcard (`*.example.com`).
    #[serde(default)]
    pub host: Option<String>,

    /// Header constraints, all of which must hold.
    #[serde(default)]
    pub headers: Vec<HeaderMatchConfig>,

    /// Allowed methods. Empty means any method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Target service name.
    pub service: String,

    /// Route priority (higher wins before specificity is considered).
    #[serde(default)]
    pub priority: i32,

    /// Filters applied after the default filters, in declared order.
    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    /// Per-attempt upstream timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Total attempt override for this route.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Header predicate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderMatchConfig {
    /// Header name (case-insensitive).
    pub name: String,

    /// Exact value to require. Absent means presence only.
    #[serde(default)]
    pub value: Option<String>,
}

/// Filter definitions, tagged by `type`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Token bucket per client IP.
    RateLimit { requests_per_second: u32, burst: u32 },

    /// Reject unless the header is present (and, optionally, one of `values`).
    RequireHeader {
        name: String,
        #[serde(default)]
        values: Vec<String>,
        #[serde(default)]
        status: Option<u16>,
    },

    /// Reject methods not listed.
    AllowMethods { methods: Vec<String> },

    /// Reject requests whose declared content length exceeds `bytes`.
    MaxBodySize { bytes: u64 },

    /// Set (replace) a header on the upstream request.
    SetRequestHeader { name: String, value: String },

    /// Remove a header from the upstream request.
    RemoveRequestHeader { name: String },

    /// Set (replace) a header on the client response.
    SetResponseHeader { name: String, value: String },

    /// Remove a header from the client response.
    RemoveResponseHeader { name: String },

    /// Drop leading path segments before forwarding.
    StripPrefix { segments: usize },
}

/// A statically configured service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name referenced by routes.
    pub name: String,

    /// Load balancing policy for this service.
    #[serde(default)]
    pub load_balancing: LoadBalancingPolicy,

    /// Known instances.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// Load balancing policy selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    Weighted,
    LeastConnections,
}

/// A single service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Instance host (IP or DNS name).
    pub host: String,

    /// Instance port.
    pub port: u16,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent requests to this instance.
    #[serde(default = "default_max_instance_conns")]
    pub max_connections: usize,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub(crate) fn default_weight() -> u32 {
    1
}

pub(crate) fn default_max_instance_conns() -> usize {
    100
}

/// Service registry client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Poll a discovery endpoint in addition to static services.
    pub enabled: bool,

    /// Base URL of the discovery endpoint.
    pub endpoint: String,

    /// Poll interval in seconds.
    pub poll_interval_secs: u64,

    /// Services to poll. Defaults to every service referenced by a route.
    pub services: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://127.0.0.1:8761".to_string(),
            poll_interval_secs: 30,
            services: Vec::new(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path requested by HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Milliseconds before an unhealthy instance is sent a trial request.
    pub recovery_cooldown_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            recovery_cooldown_ms: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Per-attempt upstream timeout in milliseconds.
    pub upstream_ms: u64,

    /// Overall inbound request deadline in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 2_000,
            upstream_ms: 10_000,
            request_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Fraction of requests that may be retried (retry budget), e.g. 0.2.
    pub budget_ratio: f32,

    /// Retries always allowed per budget window regardless of ratio.
    pub budget_min_retries: u32,

    /// Cap retries with the budget. Off means every request may use all
    /// of its attempts.
    pub budget_enabled: bool,

    /// Also retry timeouts and 5xx responses for non-idempotent methods.
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            budget_ratio: 0.2,
            budget_min_retries: 10,
            budget_enabled: false,
            retry_non_idempotent: false,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body buffered for forwarding, in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log line format: "full" or "compact".
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Full,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_route_file() {
        let raw = r#"
            [[services]]
            name = "orders"
            load_balancing = "least_connections"
            instances = [{ host = "127.0.0.1", port = 9001 }]

            [[routes]]
            id = "orders"
            path = "/api/orders/*"
            service = "orders"
            filters = [
                { type = "rate_limit", requests_per_second = 5, burst = 10 },
                { type = "strip_prefix", segments = 1 },
            ]
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.services[0].load_balancing, LoadBalancingPolicy::LeastConnections);
        assert_eq!(config.services[0].instances[0].weight, 1);
        assert_eq!(
            config.routes[0].filters[0],
            FilterConfig::RateLimit { requests_per_second: 5, burst: 10 }
        );
        assert_eq!(config.routes[0].filters[1], FilterConfig::StripPrefix { segments: 1 });
    }
}
