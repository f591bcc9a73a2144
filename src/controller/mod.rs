//! Aggregator configuration controller.
//!
//! # Data Flow
//! ```text
//! ConfigMap watch (cluster.rs)
//!     → ConfigEvent
//!     → reconciler.rs handle_event → cache.rs + queue.rs
//!     → worker: reconciler.rs sync
//!         → Secret fetch (CredentialStore)
//!         → Registry upsert / remove
//! ```
//!
//! # Design Decisions
//! - Event intake never blocks on the API server; all I/O happens in the worker
//! - Failed items retry with per-key exponential backoff, indefinitely
//! - The cluster is reached only through `source.rs` seams

pub mod cache;
pub mod cluster;
pub mod queue;
pub mod reconciler;
pub mod source;

pub use cache::ObjectCache;
pub use cluster::{watch_config_maps, KubeCredentialStore};
pub use queue::{RateLimiter, WorkQueue};
pub use reconciler::{Controller, ControllerSettings, ReconcileError, SyncOutcome};
pub use source::{
    ConfigEvent, ConfigObject, CredentialError, CredentialStore, InMemoryCredentialStore,
    SecretData,
};
