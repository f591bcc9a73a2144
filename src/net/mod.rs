//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Descriptor from the registry
//!     → transport.rs (cached client per routing key)
//!         → tls.rs (mutual-TLS client config from the credential bundle)
//!         → ServiceResolver (static overrides, then DNS)
//!     → HTTPS connection to <service>.<namespace>.svc:<port>
//!
//! Listener certificate
//!     → tls.rs load_tls_config → axum-server rustls acceptor
//! ```
//!
//! # Design Decisions
//! - One rustls identity per backend, never shared between routing keys
//! - TLS is optional on the listener and handled transparently

pub mod tls;
pub mod transport;

pub use tls::{build_client_config, load_tls_config, TlsError};
pub use transport::{ServiceResolver, TransportCache, UpstreamClient};
