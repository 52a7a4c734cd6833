//! Active health checking.
//!
//! # Responsibilities
//! - Periodically check backends
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::HealthCheckConfig;
use crate::health::state::Thresholds;
use crate::load_balancer::{Backend, BackendPool};
use crate::observability::metrics;

pub struct HealthMonitor {
    pool: Arc<BackendPool>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<BackendPool>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self { pool, config, client }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds::from_config(&self.config)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Check every backend once, concurrently.
    pub async fn check_all(&self) {
        let backends = self.pool.all_backends();
        let thresholds = self.thresholds();

        let results = join_all(backends.iter().map(|b| self.check_backend(b))).await;

        for (backend, healthy) in backends.iter().zip(results) {
            let transition = if healthy {
                backend.mark_success(thresholds)
            } else {
                backend.mark_failure(thresholds)
            };
            if let Some(state) = transition {
                metrics::record_backend_health(&backend.address, state);
            }
        }
    }

    async fn check_backend(&self, backend: &Arc<Backend>) -> bool {
        let uri = format!("http://{}{}", backend.address, self.config.path);
        let request = match Request::get(uri)
            .header(header::USER_AGENT, "api-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %backend.address, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(backend = %backend.address, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.address, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.address, "Health check failed: timeout");
                false
            }
        }
    }
}
