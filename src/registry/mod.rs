//! Routing registry subsystem.
//!
//! # Data Flow
//! ```text
//! Controller (sole writer)
//!     → store.rs upsert / remove_by_source
//!     → new snapshot published
//!
//! Dispatcher (readers)
//!     → store.rs lookup(routing_key)
//!     → Arc<BackendDescriptor>
//! ```
//!
//! # Design Decisions
//! - Explicitly constructed and shared via Arc; no global state
//! - Change detection by structural equality of descriptors

pub mod descriptor;
pub mod store;

pub use descriptor::{BackendDescriptor, CredentialBundle};
pub use store::{Registry, UpsertOutcome};
