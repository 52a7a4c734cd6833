//! Request predicates.
//!
//! # Responsibilities
//! - Parse path patterns (`/api/orders/*`) and host patterns (`*.example.com`)
//! - Evaluate path, host, header and method constraints against a request head
//! - Compute the static specificity of a predicate for ranking
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is case-sensitive and segment based; empty segments are ignored
//! - No regex to guarantee O(n) matching

use std::fmt;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request};
use thiserror::Error;

/// Borrowed view of the parts of a request that predicates look at.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// Host without port, as sent by the client.
    pub host: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestHead<'a> {
    /// Build a head from a full request.
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        Self::new(req.method(), req.uri(), req.headers())
    }

    fn new(method: &'a Method, uri: &'a axum::http::Uri, headers: &'a HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.host())
            .map(strip_port);
        Self {
            method,
            path: uri.path(),
            host,
            headers,
        }
    }
}

/// Remove a trailing `:port` from a host, keeping IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Error raised for malformed patterns.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("path pattern '{0}' must start with '/'")]
    MissingLeadingSlash(String),

    #[error("path pattern '{0}': '**' is only allowed as the last segment")]
    MisplacedCatchAll(String),

    #[error("path pattern '{0}': partial wildcard segments are not supported")]
    PartialWildcard(String),

    #[error("invalid host pattern '{0}'")]
    InvalidHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*` in a non-final position: exactly one segment.
    Any,
}

/// Segment-based path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    /// Trailing `*`/`**`: matches zero or more remaining segments.
    catch_all: bool,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        }

        let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut catch_all = false;

        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            match *part {
                "*" | "**" if last => catch_all = true,
                "**" => return Err(PatternError::MisplacedCatchAll(raw.to_string())),
                "*" => segments.push(Segment::Any),
                p if p.contains('*') => return Err(PatternError::PartialWildcard(raw.to_string())),
                p => segments.push(Segment::Literal(p.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            catch_all,
        })
    }

    /// Pattern text as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut request = path.split('/').filter(|s| !s.is_empty());

        for segment in &self.segments {
            match (segment, request.next()) {
                (Segment::Literal(expected), Some(actual)) if expected == actual => {}
                (Segment::Any, Some(_)) => {}
                _ => return false,
            }
        }

        self.catch_all || request.next().is_none()
    }

    /// Number of literal segments before the first wildcard.
    pub fn literal_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Total number of literal segments.
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Host constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Exact host, stored lowercase.
    Exact(String),
    /// `*.example.com`, stored as the lowercase suffix `.example.com`.
    Wildcard(String),
}

impl HostPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let host = raw.trim().to_ascii_lowercase();
        let invalid = || PatternError::InvalidHost(raw.to_string());

        if host.is_empty() || host.contains('/') || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        if let Some(suffix) = host.strip_prefix('*') {
            if !suffix.starts_with('.') || suffix.len() < 2 || suffix.contains('*') {
                return Err(invalid());
            }
            return Ok(HostPattern::Wildcard(suffix.to_string()));
        }

        if host.contains('*') {
            return Err(invalid());
        }
        Ok(HostPattern::Exact(strip_port(&host).to_string()))
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(expected) => host.eq_ignore_ascii_case(expected),
            HostPattern::Wildcard(suffix) => {
                host.len() > suffix.len()
                    && host.is_char_boundary(host.len() - suffix.len())
                    && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            HostPattern::Exact(_) => 2,
            HostPattern::Wildcard(_) => 1,
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPattern::Exact(host) => f.write_str(host),
            HostPattern::Wildcard(suffix) => write!(f, "*{}", suffix),
        }
    }
}

/// Header constraint: presence, or an exact value.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    pub name: HeaderName,
    pub value: Option<HeaderValue>,
}

impl HeaderMatcher {
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        match &self.value {
            None => headers.contains_key(&self.name),
            Some(expected) => headers.get_all(&self.name).iter().any(|v| v == expected),
        }
    }
}

/// How specific a predicate is. Compared field by field, greater is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity {
    pub literal_prefix: usize,
    pub literal_segments: usize,
    pub exact_path: bool,
    pub host: u8,
    pub headers: usize,
    pub methods: bool,
}

/// Full match condition of a route, AND semantics.
#[derive(Debug, Clone)]
pub struct RoutePredicate {
    pub path: PathPattern,
    pub host: Option<HostPattern>,
    pub headers: Vec<HeaderMatcher>,
    /// Empty means any method.
    pub methods: Vec<Method>,
}

impl RoutePredicate {
    pub fn matches(&self, head: &RequestHead<'_>) -> bool {
        if !self.methods.is_empty() && !self.methods.contains(head.method) {
            return false;
        }
        if let Some(host) = &self.host {
            match head.host {
                Some(actual) if host.matches(actual) => {}
                _ => return false,
            }
        }
        self.headers.iter().all(|h| h.matches(head.headers)) && self.path.matches(head.path)
    }

    pub fn specificity(&self) -> Specificity {
        Specificity {
            literal_prefix: self.path.literal_prefix_len(),
            literal_segments: self.path.literal_count(),
            exact_path: !self.path.is_catch_all(),
            host: self.host.as_ref().map(HostPattern::rank).unwrap_or(0),
            headers: self.headers.len(),
            methods: !self.methods.is_empty(),
        }
    }
}
