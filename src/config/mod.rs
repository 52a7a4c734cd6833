//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → routes compiled into a RouteTable snapshot
//!
//! On reload (file change, SIGHUP, admin API):
//!     loader.rs loads new config
//!     → validation.rs validates
//!     → route snapshot compiled, then swapped atomically
//!     → on any failure the previous snapshot stays active
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, DiscoveryConfig, FilterConfig, GatewayConfig, HeaderMatchConfig,
    HealthCheckConfig, InstanceConfig, LimitsConfig, ListenerConfig, LoadBalancingPolicy,
    LogFormat, ObservabilityConfig, RetryConfig, RouteConfig, ServiceConfig, TimeoutConfig,
};
