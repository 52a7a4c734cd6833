//! Request and response rewriting helpers used by filters.

use axum::http::{request::Parts, uri::PathAndQuery, Uri};

/// Drop the first `segments` path segments, keeping the query string.
///
/// Stripping more segments than the path has leaves `/`.
pub fn strip_path_prefix(parts: &mut Parts, segments: usize) {
    let remainder: Vec<&str> = parts
        .uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(segments)
        .collect();

    let mut path = format!("/{}", remainder.join("/"));
    if parts.uri.path().ends_with('/') && !remainder.is_empty() {
        path.push('/');
    }
    let path_and_query = match parts.uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    match PathAndQuery::try_from(path_and_query) {
        Ok(pq) => uri_parts.path_and_query = Some(pq),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to rewrite path, forwarding unchanged");
            return;
        }
    }
    if let Ok(uri) = Uri::from_parts(uri_parts) {
        parts.uri = uri;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(Body::empty()).unwrap().into_parts().0
    }

    #[test]
    fn strips_segments_and_keeps_query() {
        let mut p = parts("/api/orders/123?expand=items");
        strip_path_prefix(&mut p, 1);
        assert_eq!(p.uri.to_string(), "/orders/123?expand=items");
    }

    #[test]
    fn strip_everything_leaves_root() {
        let mut p = parts("/api");
        strip_path_prefix(&mut p, 3);
        assert_eq!(p.uri.path(), "/");
    }

    #[test]
    fn keeps_trailing_slash() {
        let mut p = parts("/api/docs/");
        strip_path_prefix(&mut p, 1);
        assert_eq!(p.uri.path(), "/docs/");
    }
}
