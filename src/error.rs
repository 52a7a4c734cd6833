//! Gateway error taxonomy.
//!
//! # Responsibilities
//! - Classify every per-request failure the gateway can produce
//! - Map each failure to the HTTP status a client observes
//! - Render failures as small JSON bodies
//!
//! # Design Decisions
//! - Per-request errors become responses, never panics or process exits
//! - `ConfigInvalid` is an operator-facing error; reloads that hit it keep
//!   the previous route table

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::config::validation::ValidationError;

/// Errors produced while serving a request or applying configuration.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No route predicate matched the request.
    #[error("no route matches {method} {path}")]
    NoRouteMatch { method: String, path: String },

    /// A pre-phase filter rejected the request.
    #[error("request rejected by {filter} filter: {message}")]
    FilterRejected {
        filter: &'static str,
        status: StatusCode,
        message: String,
    },

    /// Every attempt failed, or no instance was available.
    #[error("service '{service}' unavailable after {attempts} attempt(s)")]
    BackendUnavailable { service: String, attempts: u32 },

    /// The final attempt exceeded the upstream timeout.
    #[error("service '{service}' timed out after {}ms", .timeout.as_millis())]
    BackendTimeout { service: String, timeout: Duration },

    /// The request body exceeded the buffering limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The inbound request could not be read or forwarded as-is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream failure that is not worth retrying (malformed request, protocol error).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A configuration reload was rejected.
    #[error("invalid configuration: {}", join_errors(.0))]
    ConfigInvalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl GatewayError {
    /// HTTP status presented to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatch { .. } => StatusCode::NOT_FOUND,
            GatewayError::FilterRejected { status, .. } => *status,
            GatewayError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ConfigInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Stable machine-readable kind, used in response bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoRouteMatch { .. } => "no_route_match",
            GatewayError::FilterRejected { .. } => "filter_rejected",
            GatewayError::BackendUnavailable { .. } => "backend_unavailable",
            GatewayError::BackendTimeout { .. } => "backend_timeout",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::ConfigInvalid(_) => "config_invalid",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let err = GatewayError::NoRouteMatch {
            method: "GET".into(),
            path: "/x".into(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = GatewayError::BackendUnavailable {
            service: "orders".into(),
            attempts: 3,
        };
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "service 'orders' unavailable after 3 attempt(s)");

        let err = GatewayError::BackendTimeout {
            service: "orders".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.to_string(), "service 'orders' timed out after 250ms");
    }

    #[test]
    fn filter_rejection_keeps_status() {
        let err = GatewayError::FilterRejected {
            filter: "rate_limit",
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "slow down".into(),
        };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
