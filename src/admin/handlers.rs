use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

use crate::admin::AdminState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub synced: bool,
    pub routes: usize,
    pub pending_work_items: usize,
}

/// Route summary. Credentials are reported by size only.
#[derive(Debug, Serialize, Deserialize)]
pub struct RouteStatus {
    pub routing_key: String,
    pub source: String,
    pub upstream: String,
    pub base_path: String,
    pub use_identifier_segment: bool,
    pub certificate_bytes: usize,
    pub trust_anchor_bytes: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        synced: state.ready.load(Ordering::Acquire),
        routes: state.registry.len(),
        pending_work_items: state.queue.len(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteStatus>> {
    let routes = state
        .registry
        .snapshot()
        .into_iter()
        .map(|d| RouteStatus {
            routing_key: d.routing_key.clone(),
            source: d.source_identity.clone(),
            upstream: format!("{}:{}", d.service_host(), d.service_port),
            base_path: d.base_path.clone(),
            use_identifier_segment: d.use_identifier_segment,
            certificate_bytes: d.credentials.certificate.len(),
            trust_anchor_bytes: d.credentials.trust_anchors.len(),
        })
        .collect();
    Json(routes)
}
