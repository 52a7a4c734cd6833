//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract the request id assigned by the request-id layer
//! - Strip hop-by-hop headers before forwarding
//! - Add `x-forwarded-*` headers
//! - Rebuild the upstream request for each attempt
//!
//! # Design Decisions
//! - The inbound `Host` is not forwarded; it travels as `x-forwarded-host`
//!   and the upstream sees its own authority
//! - Upstream requests always go out as HTTP/1.1

use std::str::FromStr;

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Method, Request, Uri};

use crate::error::GatewayError;
use crate::http::context::RequestContext;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// Request id set by the request-id layer, if any.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Method, target and headers of a request, replayable across attempts.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path_and_query: PathAndQuery,
    pub headers: HeaderMap,
}

impl UpstreamRequest {
    /// Capture the forwarding template from the (already filtered) request parts.
    pub fn from_parts(parts: &Parts, ctx: &RequestContext) -> Self {
        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);

        let inbound_host = headers.remove(header::HOST).or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
        if let Some(host) = inbound_host {
            headers.insert(X_FORWARDED_HOST, host);
        }

        if let Some(addr) = ctx.client_addr {
            let client_ip = addr.ip().to_string();
            let chained = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{}, {}", prior, client_ip),
                None => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&chained) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        if !headers.contains_key(X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
        }

        if !headers.contains_key(X_REQUEST_ID) {
            if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
                headers.insert(X_REQUEST_ID, value);
            }
        }

        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        Self {
            method: parts.method.clone(),
            path_and_query,
            headers,
        }
    }

    /// Build the request for one attempt against `address` (`host:port`).
    pub fn build(&self, address: &str, body: Bytes) -> Result<Request<Body>, GatewayError> {
        let authority = Authority::from_str(address)
            .map_err(|e| GatewayError::Upstream(format!("invalid backend address '{}': {}", address, e)))?;
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(authority)
            .path_and_query(self.path_and_query.clone())
            .build()
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let mut request = Request::new(Body::from(body));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}
