//! Upstream HTTP client.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

/// Failure of a single upstream exchange.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No connection could be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection was made but the exchange failed.
    #[error("request failed: {0}")]
    Request(String),
}

/// Sends one request to one backend.
#[async_trait]
pub trait Upstream: Send + Sync + Debug {
    /// `request` already carries the absolute URI of the backend.
    async fn send(&self, request: Request<Body>) -> Result<Response, UpstreamError>;

    /// Apply a new connect timeout. Default: ignored.
    fn set_connect_timeout(&self, _timeout: Duration) {}
}

/// hyper-util pooled client.
#[derive(Debug)]
pub struct HttpUpstream {
    client: ArcSwap<Client<HttpConnector, Body>>,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            client: ArcSwap::from_pointee(Self::build_client(connect_timeout)),
        }
    }

    fn build_client(connect_timeout: Duration) -> Client<HttpConnector, Body> {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        Client::builder(TokioExecutor::new()).build(connector)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: Request<Body>) -> Result<Response, UpstreamError> {
        let client = self.client.load_full();
        let result: Result<hyper::Response<Incoming>, _> = client.request(request).await;
        match result {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(e) if e.is_connect() => Err(UpstreamError::Connect(e.to_string())),
            Err(e) => Err(UpstreamError::Request(e.to_string())),
        }
    }

    fn set_connect_timeout(&self, timeout: Duration) {
        self.client.store(Arc::new(Self::build_client(timeout)));
    }
}
