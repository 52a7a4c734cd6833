//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by route
//! - `gateway_upstream_attempts_total` (counter): attempts by service, backend, outcome
//! - `gateway_retries_total` (counter): retries by service
//! - `gateway_filter_rejections_total` (counter): short-circuits by filter
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy, by backend
//! - `gateway_route_table_version` (gauge): version of the active snapshot

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::state::HealthState;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(route: &str, method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_attempt(service: &str, backend: &str, outcome: &'static str) {
    metrics::counter!(
        "gateway_upstream_attempts_total",
        "service" => service.to_string(),
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(service: &str) {
    metrics::counter!("gateway_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_filter_rejection(filter: &'static str) {
    metrics::counter!("gateway_filter_rejections_total", "filter" => filter).increment(1);
}

pub fn record_backend_health(backend: &str, state: HealthState) {
    let value = if state == HealthState::Unhealthy { 0.0 } else { 1.0 };
    metrics::gauge!("gateway_backend_health", "backend" => backend.to_string()).set(value);
}

pub fn record_route_table_version(version: u64) {
    metrics::gauge!("gateway_route_table_version").set(version as f64);
}
