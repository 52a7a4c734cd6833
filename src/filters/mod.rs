//! Filter subsystem.
//!
//! # Data Flow
//! ```text
//! Matched route
//!     → chain.rs: pre-phase filters in declared order
//!         → any filter may short-circuit with a response
//!     → dispatcher (only when every pre-phase filter continued)
//!     → chain.rs: post-phase filters in reverse order (onion)
//! ```
//!
//! # Design Decisions
//! - Filters are a closed enum with one request hook and one response hook
//! - Filters hold configuration and, for rate limiting, their own bucket state
//! - A new route snapshot builds new filters; limiter state does not carry over

pub mod chain;
pub mod headers;
pub mod rate_limit;

use std::sync::Arc;

use axum::http::{
    header, request::Parts, HeaderName, HeaderValue, Method, StatusCode,
};
use axum::response::{IntoResponse, Response};

use crate::config::schema::FilterConfig;
use crate::error::GatewayError;
use crate::http::context::RequestContext;

pub use chain::FilterChain;
pub use rate_limit::RateLimiter;

/// Result of a pre-phase hook.
#[derive(Debug)]
pub enum FilterAction {
    Continue,
    ShortCircuit(Response),
}

/// A configured filter.
#[derive(Debug, Clone)]
pub enum Filter {
    RateLimit(Arc<RateLimiter>),
    RequireHeader {
        name: HeaderName,
        values: Vec<HeaderValue>,
        status: StatusCode,
    },
    AllowMethods(Vec<Method>),
    MaxBodySize(u64),
    SetRequestHeader(HeaderName, HeaderValue),
    RemoveRequestHeader(HeaderName),
    SetResponseHeader(HeaderName, HeaderValue),
    RemoveResponseHeader(HeaderName),
    StripPrefix(usize),
}

fn header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| format!("invalid header name '{name}'"))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, String> {
    HeaderValue::from_str(value).map_err(|_| format!("invalid header value for '{name}'"))
}

fn method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid method '{raw}'"))
}

impl Filter {
    /// Build a filter from its configuration.
    pub fn from_config(config: &FilterConfig) -> Result<Self, String> {
        let filter = match config {
            FilterConfig::RateLimit { requests_per_second, burst } => {
                if *requests_per_second == 0 || *burst == 0 {
                    return Err("rate_limit requires requests_per_second and burst > 0".into());
                }
                Filter::RateLimit(Arc::new(RateLimiter::new(*requests_per_second, *burst)))
            }
            FilterConfig::RequireHeader { name, values, status } => {
                let status = match status {
                    Some(code) => StatusCode::from_u16(*code)
                        .ok()
                        .filter(|s| s.is_client_error() || s.is_server_error())
                        .ok_or_else(|| format!("require_header status {code} is not an error status"))?,
                    None => StatusCode::UNAUTHORIZED,
                };
                Filter::RequireHeader {
                    name: header_name(name)?,
                    values: values
                        .iter()
                        .map(|v| header_value(name, v))
                        .collect::<Result<_, _>>()?,
                    status,
                }
            }
            FilterConfig::AllowMethods { methods } => {
                if methods.is_empty() {
                    return Err("allow_methods requires at least one method".into());
                }
                Filter::AllowMethods(methods.iter().map(|m| method(m)).collect::<Result<_, _>>()?)
            }
            FilterConfig::MaxBodySize { bytes } => {
                if *bytes == 0 {
                    return Err("max_body_size requires bytes > 0".into());
                }
                Filter::MaxBodySize(*bytes)
            }
            FilterConfig::SetRequestHeader { name, value } => {
                Filter::SetRequestHeader(header_name(name)?, header_value(name, value)?)
            }
            FilterConfig::RemoveRequestHeader { name } => Filter::RemoveRequestHeader(header_name(name)?),
            FilterConfig::SetResponseHeader { name, value } => {
                Filter::SetResponseHeader(header_name(name)?, header_value(name, value)?)
            }
            FilterConfig::RemoveResponseHeader { name } => {
                Filter::RemoveResponseHeader(header_name(name)?)
            }
            FilterConfig::StripPrefix { segments } => {
                if *segments == 0 {
                    return Err("strip_prefix requires segments > 0".into());
                }
                Filter::StripPrefix(*segments)
            }
        };
        Ok(filter)
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::RateLimit(_) => "rate_limit",
            Filter::RequireHeader { .. } => "require_header",
            Filter::AllowMethods(_) => "allow_methods",
            Filter::MaxBodySize(_) => "max_body_size",
            Filter::SetRequestHeader(..) => "set_request_header",
            Filter::RemoveRequestHeader(_) => "remove_request_header",
            Filter::SetResponseHeader(..) => "set_response_header",
            Filter::RemoveResponseHeader(_) => "remove_response_header",
            Filter::StripPrefix(_) => "strip_prefix",
        }
    }

    /// Pre-phase hook.
    pub fn on_request(&self, ctx: &RequestContext, parts: &mut Parts) -> FilterAction {
        match self {
            Filter::RateLimit(limiter) => {
                let key = ctx.client_key();
                if limiter.check(&key) {
                    FilterAction::Continue
                } else {
                    tracing::warn!(request_id = %ctx.request_id, client = %key, "Rate limit exceeded");
                    self.reject(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
                }
            }
            Filter::RequireHeader { name, values, status } => {
                let ok = match parts.headers.get(name) {
                    None => false,
                    Some(_) if values.is_empty() => true,
                    Some(actual) => values.iter().any(|v| v == actual),
                };
                if ok {
                    FilterAction::Continue
                } else {
                    self.reject(*status, format!("missing or invalid '{name}' header"))
                }
            }
            Filter::AllowMethods(methods) => {
                if methods.contains(&parts.method) {
                    FilterAction::Continue
                } else {
                    self.reject(
                        StatusCode::METHOD_NOT_ALLOWED,
                        format!("method {} not allowed", parts.method),
                    )
                }
            }
            Filter::MaxBodySize(limit) => {
                let declared = parts
                    .headers
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                match declared {
                    Some(len) if len > *limit => self.reject(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        format!("body of {len} bytes exceeds {limit}"),
                    ),
                    _ => FilterAction::Continue,
                }
            }
            Filter::SetRequestHeader(name, value) => {
                parts.headers.insert(name.clone(), value.clone());
                FilterAction::Continue
            }
            Filter::RemoveRequestHeader(name) => {
                parts.headers.remove(name);
                FilterAction::Continue
            }
            Filter::StripPrefix(segments) => {
                headers::strip_path_prefix(parts, *segments);
                FilterAction::Continue
            }
            Filter::SetResponseHeader(..) | Filter::RemoveResponseHeader(_) => FilterAction::Continue,
        }
    }

    /// Post-phase hook.
    pub fn on_response(&self, _ctx: &RequestContext, response: &mut Response) {
        match self {
            Filter::SetResponseHeader(name, value) => {
                response.headers_mut().insert(name.clone(), value.clone());
            }
            Filter::RemoveResponseHeader(name) => {
                response.headers_mut().remove(name);
            }
            _ => {}
        }
    }

    fn reject(&self, status: StatusCode, message: impl Into<String>) -> FilterAction {
        FilterAction::ShortCircuit(
            GatewayError::FilterRejected {
                filter: self.name(),
                status,
                message: message.into(),
            }
            .into_response(),
        )
    }
}
