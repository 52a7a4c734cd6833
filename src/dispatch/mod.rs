//! Request dispatch to backend services.
//!
//! # Data Flow
//! ```text
//! FilterChain (pre-phase done)
//!     → Dispatch::dispatch(ctx, request)
//!     → dispatcher.rs
//!         buffer body (bounded)
//!         loop:
//!             pool.select(service, tried)      // load_balancer
//!             upstream.send(...) under deadline // upstream.rs
//!             classify outcome                  // resilience
//!             success → response
//!             transient failure → backoff, next backend
//!     → FilterChain (post-phase)
//! ```

pub mod dispatcher;
pub mod upstream;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

use crate::error::GatewayResult;
use crate::http::context::RequestContext;

pub use dispatcher::{DispatchSettings, Dispatcher};
pub use upstream::{HttpUpstream, Upstream, UpstreamError};

/// The innermost step of a filter chain: turn a request into a response.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, ctx: &mut RequestContext, request: Request<Body>) -> GatewayResult<Response>;
}
