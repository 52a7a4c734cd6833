//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Check every backend of every known service
//!     → Update state.rs
//!
//! Passive health checks (dispatch):
//!     Attempt outcome observed
//!     → success / failure recorded on the backend
//!     → Update state.rs if threshold crossed
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks feed the same tracker
//! - State transitions require consecutive successes/failures
//! - Health state is per-backend, not per-service
//! - Registry status and local health are tracked separately

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthState, HealthTracker, Thresholds};
