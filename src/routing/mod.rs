//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, host, path, headers)
//!     → table.rs (load current snapshot)
//!     → matcher.rs (first match in ranked order)
//!     → predicate.rs (evaluate path/host/header/method conditions)
//!     → Return: matched Route or NoMatch
//!
//! Route Compilation (startup and reload):
//!     RouteConfig[]
//!     → route.rs (parse patterns, build filter chain)
//!     → matcher.rs (rank by priority, specificity, declaration order)
//!     → table.rs (atomic snapshot swap)
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; reloads publish a new one
//! - No regex in hot path (segment matching only)
//! - Deterministic: same input always matches same route
//! - Explicit NoMatch rather than silent default

pub mod matcher;
pub mod predicate;
pub mod route;
pub mod table;

pub use predicate::RequestHead;
pub use route::Route;
pub use table::{RouteSnapshot, RouteTable};
