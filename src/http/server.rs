//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all gateway handler
//! - Wire up middleware (request id, tracing, timeout, concurrency limit)
//! - Spawn background tasks (health monitor, discovery poller, reloads)
//! - Serve until shutdown, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::discovery::DiscoveryPoller;
use crate::dispatch::Upstream;
use crate::error::GatewayError;
use crate::gateway::GatewayState;
use crate::health::HealthMonitor;
use crate::http::context::{RequestContext, RequestPhase};
use crate::http::request::{self, X_REQUEST_ID};
use crate::lifecycle::shutdown;
use crate::observability::metrics;
use crate::routing::RequestHead;

/// HTTP server for the gateway.
pub struct GatewayServer {
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Build a server from configuration. Fails if the configuration is invalid.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self::from_state(GatewayState::new(config)?))
    }

    /// Build a server around a custom upstream client.
    pub fn with_upstream(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Result<Self, GatewayError> {
        Ok(Self::from_state(GatewayState::with_upstream(config, upstream)?))
    }

    pub fn from_state(state: GatewayState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let config = self.state.config();
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(self.state.clone())
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// `config_updates` carries configurations from the file watcher; each is
    /// applied or rejected as a unit.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config();
        tracing::info!(address = %addr, routes = config.routes.len(), "HTTP server starting");

        // Background tasks stop when the server stops.
        let (tasks_tx, _) = broadcast::channel::<()>(1);

        if config.health_check.enabled {
            let monitor = HealthMonitor::new(self.state.pool.clone(), config.health_check.clone());
            tokio::spawn(monitor.run(tasks_tx.subscribe()));
        }

        if config.discovery.enabled {
            match DiscoveryPoller::new(
                &config.discovery,
                self.state.discovery_services(),
                self.state.registry.clone(),
            ) {
                Ok(poller) => {
                    tokio::spawn(poller.run(tasks_tx.subscribe()));
                }
                Err(e) => tracing::error!(error = %e, "Discovery poller not started"),
            }
        }

        let reload_state = self.state.clone();
        let mut reload_shutdown = tasks_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => {
                            if let Err(e) = reload_state.apply_config(config) {
                                tracing::error!(error = %e, "Configuration update rejected");
                            }
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await;

        let _ = tasks_tx.send(());
        tracing::info!("HTTP server stopped");
        result
    }
}

/// Catch-all gateway handler: match, filter, dispatch.
async fn gateway_handler(State(state): State<Arc<GatewayState>>, request: Request<Body>) -> Response {
    let start = Instant::now();
    state.record_request();

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_id = request::request_id(request.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().to_string();

    let mut ctx = RequestContext::new(request_id, client_addr);
    let snapshot = state.routes.snapshot();
    ctx.snapshot_version = snapshot.version;

    let matched = snapshot.lookup(&RequestHead::from_request(&request)).cloned();
    let Some(route) = matched else {
        ctx.enter(RequestPhase::NoMatch);
        let path = request.uri().path().to_string();
        tracing::info!(request_id = %ctx.request_id, method = %method, path = %path, "No route matched");
        metrics::record_request("none", &method, 404, start);
        return GatewayError::NoRouteMatch { method, path }.into_response();
    };

    ctx.set_route(route.clone());
    tracing::debug!(
        request_id = %ctx.request_id,
        route = %route.id,
        service = %route.service,
        version = ctx.snapshot_version,
        "Route matched"
    );

    let response = route.filters.execute(&mut ctx, request, state.dispatcher.as_ref()).await;

    let status = response.status();
    metrics::record_request(&route.id, &method, status.as_u16(), start);
    tracing::info!(
        request_id = %ctx.request_id,
        route = %route.id,
        status = status.as_u16(),
        phase = ctx.phase().as_str(),
        attempts = ctx.attempts(),
        backend = ctx.instance().unwrap_or("-"),
        elapsed_ms = ctx.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}
