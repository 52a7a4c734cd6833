use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::error::GatewayError;
use crate::gateway::{GatewayState, ReloadError};
use crate::health::HealthState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub route_table_version: u64,
    pub routes: usize,
}

#[derive(Serialize)]
pub struct RouteSummary {
    pub id: String,
    pub path: String,
    pub host: Option<String>,
    pub methods: Vec<String>,
    pub service: String,
    pub priority: i32,
    pub filters: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct RouteListing {
    pub version: u64,
    pub published_at_unix: u64,
    /// In match order.
    pub routes: Vec<RouteSummary>,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub address: String,
    pub weight: u32,
    pub registry_up: bool,
    pub health: HealthState,
    pub active_connections: usize,
    pub latency_ewma_ms: f64,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub policy: String,
    pub backends: Vec<BackendStatus>,
}

#[derive(Serialize)]
pub struct ReloadOutcome {
    pub reloaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

pub async fn get_status(State(state): State<Arc<GatewayState>>) -> Json<SystemStatus> {
    let snapshot = state.routes.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        total_requests: state.request_count.load(Ordering::Relaxed),
        route_table_version: snapshot.version,
        routes: snapshot.len(),
    })
}

pub async fn get_routes(State(state): State<Arc<GatewayState>>) -> Json<RouteListing> {
    let snapshot = state.routes.snapshot();
    let routes = snapshot
        .routes()
        .iter()
        .map(|r| RouteSummary {
            id: r.id.clone(),
            path: r.predicate.path.as_str().to_string(),
            host: r.predicate.host.as_ref().map(|h| h.to_string()),
            methods: r.predicate.methods.iter().map(|m| m.to_string()).collect(),
            service: r.service.clone(),
            priority: r.priority,
            filters: r.filters.names(),
        })
        .collect();

    Json(RouteListing {
        version: snapshot.version,
        published_at_unix: snapshot
            .published_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        routes,
    })
}

pub async fn get_services(State(state): State<Arc<GatewayState>>) -> Json<Vec<ServiceStatus>> {
    let services = state
        .pool
        .all_groups()
        .into_iter()
        .map(|(name, group)| ServiceStatus {
            name,
            policy: format!("{:?}", group.policy),
            backends: group
                .backends
                .iter()
                .map(|b| BackendStatus {
                    id: b.id.clone(),
                    address: b.address.clone(),
                    weight: b.weight,
                    registry_up: b.is_registry_up(),
                    health: b.health(),
                    active_connections: b.active(),
                    latency_ewma_ms: b.latency_micros() as f64 / 1000.0,
                })
                .collect(),
        })
        .collect();
    Json(services)
}

pub async fn post_reload(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let outcome = tokio::task::spawn_blocking(move || state.reload_from_disk()).await;

    match outcome {
        Ok(Ok(version)) => (
            StatusCode::OK,
            Json(ReloadOutcome {
                reloaded: true,
                version: Some(version),
                errors: Vec::new(),
            }),
        ),
        Ok(Err(ReloadError::Rejected(GatewayError::ConfigInvalid(errors)))) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ReloadOutcome {
                reloaded: false,
                version: None,
                errors: errors.iter().map(ToString::to_string).collect(),
            }),
        ),
        Ok(Err(e)) => (
            StatusCode::BAD_REQUEST,
            Json(ReloadOutcome {
                reloaded: false,
                version: None,
                errors: vec![e.to_string()],
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReloadOutcome {
                reloaded: false,
                version: None,
                errors: vec![e.to_string()],
            }),
        ),
    }
}

