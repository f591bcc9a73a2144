//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! startup.rs:
//!     logging → metrics exporter → kube client → registry + controller
//!     → ConfigMap watch → dispatcher + server → admin API → serve
//!
//! signals.rs:
//!     SIGTERM / SIGINT → Shutdown::trigger
//!
//! shutdown.rs:
//!     trigger → listeners stop accepting, tunnels close, controller queue
//!     shuts down and its worker drains
//! ```
//!
//! # Design Decisions
//! - Any startup failure is fatal and reported before traffic is accepted
//! - A single `Shutdown` handle is cloned into every long-running task
//! - The TLS listener gets a bounded drain deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};
