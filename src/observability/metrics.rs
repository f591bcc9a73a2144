//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define aggregator metrics (dispatch, upgrades, reconciliation, queue)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `aggregator_dispatch_requests_total` (counter): proxied requests by method, status
//! - `aggregator_dispatch_duration_seconds` (histogram): time to upstream response headers
//! - `aggregator_upgrade_sessions_active` (gauge): open upgrade tunnels
//! - `aggregator_reconcile_total` (counter): work items processed by result
//! - `aggregator_registry_entries` (gauge): routable backends
//! - `aggregator_workqueue_depth` (gauge): keys waiting in the work queue
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so tests need no setup
//! - Labels are low-cardinality: method, status code, result

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a proxied request outcome.
pub fn record_dispatch(method: &str, status: u16, start: Instant) {
    counter!(
        "aggregator_dispatch_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("aggregator_dispatch_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn upgrade_session_started() {
    gauge!("aggregator_upgrade_sessions_active").increment(1.0);
}

pub fn upgrade_session_ended() {
    gauge!("aggregator_upgrade_sessions_active").decrement(1.0);
}

/// Record a processed work item, `result` being "success" or "error".
pub fn record_reconcile(result: &'static str) {
    counter!("aggregator_reconcile_total", "result" => result).increment(1);
}

pub fn record_registry_size(entries: usize) {
    gauge!("aggregator_registry_entries").set(entries as f64);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("aggregator_workqueue_depth").set(depth as f64);
}
