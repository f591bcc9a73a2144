//! Admin API.
//!
//! Read-only introspection of the routing table behind bearer-token auth.
//! Served on its own listener, never on the proxy port.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::controller::WorkQueue;
use crate::registry::Registry;
use self::auth::admin_auth_middleware;
use self::handlers::{get_routes, get_status};

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub queue: WorkQueue,
    pub ready: Arc<AtomicBool>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
