//! Response handling and transformation.
//!
//! Upstream responses stream back to the client untouched apart from
//! hop-by-hop headers, which belong to the upstream connection.

use axum::http::header::HeaderValue;
use axum::response::Response;

use crate::http::request::{strip_hop_by_hop, X_REQUEST_ID};

/// Prepare an upstream response for the client.
pub fn sanitize(mut response: Response, request_id: &str) -> Response {
    strip_hop_by_hop(response.headers_mut());
    if !response.headers().contains_key(X_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header;

    #[test]
    fn removes_connection_headers_and_tags_request_id() {
        let response = Response::builder()
            .header(header::CONNECTION, "close")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::empty())
            .unwrap();

        let response = sanitize(response, "abc");
        assert!(!response.headers().contains_key(header::CONNECTION));
        assert_eq!(response.headers()[X_REQUEST_ID], "abc");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }
}
