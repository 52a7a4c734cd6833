//! Configuration-driven API gateway.
//!
//! Requests are matched against a versioned route table, passed through the
//! route's filter chain and dispatched to an instance of the target service
//! chosen by a load balancer, with deadlines and retries.

// Core request path
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filters;
pub mod gateway;
pub mod http;
pub mod routing;

// Backends
pub mod discovery;
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::GatewayState;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
