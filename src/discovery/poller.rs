//! Polls an HTTP discovery endpoint and pushes results into the registry.
//!
//! Protocol: `GET {endpoint}/services/{name}` returning a JSON array of
//! instances. A 404 means the endpoint does not know the service, so the
//! statically configured instances apply again. Any other failure keeps
//! the last known list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use crate::config::schema::{default_max_instance_conns, default_weight, DiscoveryConfig};
use crate::discovery::{InstanceStatus, ServiceInstance, StaticRegistry};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid discovery endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("discovery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("discovery endpoint returned {status} for service '{service}'")]
    Status { service: String, status: StatusCode },
}

/// Wire format of one instance.
#[derive(Debug, Deserialize)]
struct DiscoveredInstance {
    #[serde(default)]
    id: Option<String>,
    host: String,
    port: u16,
    #[serde(default = "default_weight")]
    weight: u32,
    #[serde(default = "default_max_instance_conns")]
    max_connections: usize,
    #[serde(default)]
    status: InstanceStatus,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl DiscoveredInstance {
    fn into_instance(self, service: &str) -> ServiceInstance {
        ServiceInstance {
            id: self
                .id
                .unwrap_or_else(|| format!("{}-{}:{}", service, self.host, self.port)),
            host: self.host,
            port: self.port,
            weight: self.weight,
            max_connections: self.max_connections,
            status: self.status,
            metadata: self.metadata,
        }
    }
}

pub struct DiscoveryPoller {
    client: reqwest::Client,
    endpoint: Url,
    interval: Duration,
    services: Arc<ArcSwap<Vec<String>>>,
    registry: Arc<StaticRegistry>,
}

impl DiscoveryPoller {
    /// `services` is shared so reloads can change the polled set.
    pub fn new(
        config: &DiscoveryConfig,
        services: Arc<ArcSwap<Vec<String>>>,
        registry: Arc<StaticRegistry>,
    ) -> Result<Self, DiscoveryError> {
        let mut endpoint = Url::parse(&config.endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            endpoint,
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            services,
            registry,
        })
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            endpoint = %self.endpoint,
            interval_secs = self.interval.as_secs(),
            "Discovery poller starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Discovery poller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Poll every service once. Returns how many services changed.
    pub async fn poll_once(&self) -> usize {
        let services = self.services.load_full();
        let mut changed = 0;
        for service in services.iter() {
            match self.fetch(service).await {
                Ok(Some(instances)) => {
                    if self.registry.update_service(service, instances) {
                        changed += 1;
                    }
                }
                Ok(None) => self.registry.remove_discovered(service),
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "Discovery poll failed, keeping last known instances");
                }
            }
        }
        changed
    }

    /// `Ok(None)` when the endpoint does not know the service.
    async fn fetch(&self, service: &str) -> Result<Option<Vec<ServiceInstance>>, DiscoveryError> {
        let url = self.endpoint.join(&format!("services/{}", service))?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let instances: Vec<DiscoveredInstance> = response.json().await?;
                Ok(Some(
                    instances
                        .into_iter()
                        .map(|i| i.into_instance(service))
                        .collect(),
                ))
            }
            status => Err(DiscoveryError::Status {
                service: service.to_string(),
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{InstanceConfig, ServiceConfig};
    use crate::discovery::ServiceRegistry;
    use axum::{http::StatusCode as AxumStatus, routing::get, Json, Router};

    async fn serve_registry() -> String {
        let app = Router::new()
            .route(
                "/registry/services/orders",
                get(|| async {
                    Json(serde_json::json!([
                        { "host": "10.0.0.1", "port": 8080, "weight": 2 },
                        { "host": "10.0.0.2", "port": 8080, "status": "down" }
                    ]))
                }),
            )
            .route("/registry/services/broken", get(|| async { AxumStatus::INTERNAL_SERVER_ERROR }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/registry", addr)
    }

    fn static_service(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            load_balancing: Default::default(),
            instances: vec![InstanceConfig {
                host: "127.0.0.1".to_string(),
                port: 7000,
                weight: 1,
                max_connections: 10,
                metadata: Default::default(),
            }],
        }
    }

    #[tokio::test]
    async fn poll_updates_registry_and_keeps_last_known_on_error() {
        let endpoint = serve_registry().await;
        let registry = Arc::new(StaticRegistry::from_config(&[static_service("broken"), static_service("unknown")]));
        let services = Arc::new(ArcSwap::from_pointee(vec![
            "orders".to_string(),
            "broken".to_string(),
            "unknown".to_string(),
        ]));
        let config = DiscoveryConfig {
            enabled: true,
            endpoint,
            poll_interval_secs: 1,
            services: Vec::new(),
        };
        let poller = DiscoveryPoller::new(&config, services, registry.clone()).unwrap();

        assert_eq!(poller.poll_once().await, 1);

        let orders = registry.list_instances("orders");
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].weight, 2);
        assert_eq!(orders[0].id, "orders-10.0.0.1:8080");
        assert_eq!(orders[0].max_connections, default_max_instance_conns());
        assert_eq!(orders[1].status, InstanceStatus::Down);

        // 500 keeps the static list; 404 falls back to it.
        assert_eq!(registry.list_instances("broken")[0].port, 7000);
        assert_eq!(registry.list_instances("unknown")[0].port, 7000);

        // Unchanged on a second poll.
        assert_eq!(poller.poll_once().await, 0);
    }
}
