//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher:  request outcome, tunnel open/close  → metrics.rs
//! Controller:  reconcile result, queue depth       → metrics.rs
//! Registry:    route count after each write        → metrics.rs
//! Everything:  tracing events                      → logging.rs → stdout
//! ```
//!
//! # Design Decisions
//! - Log format (pretty or JSON) and level come from configuration; `RUST_LOG` wins
//! - Request spans carry the `x-request-id` assigned at the edge
//! - The Prometheus exporter serves its own listener, separate from the proxy

pub mod logging;
pub mod metrics;
