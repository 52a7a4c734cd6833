//! Route ranking and selection.
//!
//! # Responsibilities
//! - Order routes so the most specific one is evaluated first
//! - Return the single best match for a request, or nothing
//!
//! # Design Decisions
//! - Ranking is static per route, so it is computed once per snapshot
//! - Order: priority, then specificity, then declaration order (first wins)
//! - Lookup is a first-match scan over the ranked list

use std::cmp::Ordering;
use std::sync::Arc;

use crate::routing::predicate::RequestHead;
use crate::routing::route::Route;

/// Compare two routes; `Less` means `a` is tried before `b`.
pub fn compare(a: &Route, b: &Route) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.specificity.cmp(&a.specificity))
        .then_with(|| a.order.cmp(&b.order))
}

/// Sort routes into evaluation order.
pub fn rank(routes: &mut [Arc<Route>]) {
    routes.sort_by(|a, b| compare(a, b));
}

/// Best match in a ranked route list.
pub fn best_match<'r>(ranked: &'r [Arc<Route>], head: &RequestHead<'_>) -> Option<&'r Arc<Route>> {
    ranked.iter().find(|route| route.predicate.matches(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;
    use axum::body::Body;
    use axum::http::Request;

    fn route(order: usize, id: &str, path: &str, host: Option<&str>, priority: i32) -> Arc<Route> {
        let cfg = RouteConfig {
            id: id.to_string(),
            path: path.to_string(),
            host: host.map(str::to_string),
            headers: Vec::new(),
            methods: Vec::new(),
            service: id.to_string(),
            priority,
            filters: Vec::new(),
            timeout_ms: None,
            max_attempts: None,
        };
        Arc::new(Route::compile(order, &cfg, &[]).unwrap())
    }

    fn lookup(routes: &[Arc<Route>], host: &str, path: &str) -> Option<String> {
        let req = Request::builder()
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap();
        best_match(routes, &RequestHead::from_request(&req)).map(|r| r.id.clone())
    }

    #[test]
    fn longest_literal_prefix_wins() {
        let mut routes = vec![
            route(0, "catch-all", "/*", None, 0),
            route(1, "orders", "/api/orders/*", None, 0),
            route(2, "api", "/api/*", None, 0),
        ];
        rank(&mut routes);

        assert_eq!(lookup(&routes, "gw", "/api/orders/123").as_deref(), Some("orders"));
        assert_eq!(lookup(&routes, "gw", "/api/users").as_deref(), Some("api"));
        assert_eq!(lookup(&routes, "gw", "/static/app.js").as_deref(), Some("catch-all"));
    }

    #[test]
    fn host_specificity_breaks_path_ties() {
        let mut routes = vec![
            route(0, "any", "/api/*", None, 0),
            route(1, "wild", "/api/*", Some("*.example.com"), 0),
            route(2, "exact", "/api/*", Some("api.example.com"), 0),
        ];
        rank(&mut routes);

        assert_eq!(lookup(&routes, "api.example.com", "/api/x").as_deref(), Some("exact"));
        assert_eq!(lookup(&routes, "web.example.com", "/api/x").as_deref(), Some("wild"));
        assert_eq!(lookup(&routes, "other.org", "/api/x").as_deref(), Some("any"));
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let mut routes = vec![
            route(0, "first", "/api/*", None, 0),
            route(1, "second", "/api/*", None, 0),
        ];
        rank(&mut routes);
        assert_eq!(lookup(&routes, "gw", "/api/x").as_deref(), Some("first"));

        // Input order does not matter, only declaration index.
        let mut reversed = vec![routes[1].clone(), routes[0].clone()];
        rank(&mut reversed);
        assert_eq!(lookup(&reversed, "gw", "/api/x").as_deref(), Some("first"));
    }

    #[test]
    fn priority_overrides_specificity() {
        let mut routes = vec![
            route(0, "orders", "/api/orders/*", None, 0),
            route(1, "maintenance", "/*", None, 10),
        ];
        rank(&mut routes);
        assert_eq!(lookup(&routes, "gw", "/api/orders/1").as_deref(), Some("maintenance"));
    }

    #[test]
    fn no_match() {
        let mut routes = vec![route(0, "orders", "/api/orders/*", None, 0)];
        rank(&mut routes);
        assert_eq!(lookup(&routes, "gw", "/other"), None);
    }
}
