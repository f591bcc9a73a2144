//! Routing utilities.
//!
//! # Data Flow
//! ```text
//! Incoming Request path
//!     → path.rs (extract routing key, identifier, remaining path)
//!     → registry lookup by routing key (Dispatcher)
//!
//! Watched ConfigMap labels
//!     → labels.rs (selector evaluation)
//!     → admit / ignore the object (Controller)
//! ```
//!
//! # Design Decisions
//! - Pure functions only, no I/O and no shared state
//! - The routing key sits at a fixed segment offset; no regex in the hot path
//! - An empty selector selects everything

pub mod labels;
pub mod path;

pub use labels::{LabelSelector, SelectorError};
pub use path::{parse_proxy_path, parse_routing_key, PathError, ProxyPath};
