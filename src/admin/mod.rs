//! Admin API: status, routes, services and reload.
//!
//! Served on its own listener; every endpoint requires
//! `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::gateway::GatewayState;

use self::auth::admin_auth_middleware;
use self::handlers::*;

pub fn setup_admin_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/services", get(get_services))
        .route("/admin/reload", post(post_reload))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
