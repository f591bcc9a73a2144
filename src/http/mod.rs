//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → dispatcher.rs (path → registry → upstream location)
//!     → upgrade.rs (hop-by-hop headers, 101 tunnels)
//!     → response.rs (Status JSON on failure)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;
pub mod upgrade;

pub use dispatcher::{build_upstream_uri, connect_handler, Dispatcher};
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use response::{DispatchError, Status};
pub use server::{AppState, HttpServer, ServerError};
