//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against a backend:
//!     → timeouts.rs (per-attempt upstream deadline, route override)
//!     → On failure: retries.rs (classify, check budget, back off)
//!     → Next attempt prefers a different backend
//! ```
//!
//! # Design Decisions
//! - Every upstream call has a deadline
//! - Timeouts and 5xx retried only for idempotent methods unless configured
//! - Connection failures are always retryable (nothing reached the backend)
//! - Retry budget caps retries to a fraction of traffic

pub mod retries;
pub mod timeouts;

pub use retries::{FailureKind, RetryBudget, RetryPolicy};
pub use timeouts::Deadlines;
