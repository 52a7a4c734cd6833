//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id / trace / timeout / limit layers)
//!     → gateway handler: route snapshot lookup
//!     → context.rs (per-request state)
//!     → route filter chain → dispatcher
//!         request.rs (forwarding headers, per-attempt request)
//!         response.rs (hop-by-hop cleanup)
//!     → Send to client
//! ```

pub mod context;
pub mod request;
pub mod response;
pub mod server;

pub use context::{RequestContext, RequestPhase};
pub use request::X_REQUEST_ID;
pub use server::GatewayServer;
