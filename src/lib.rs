//! Aggregator proxy library.
//!
//! Routes `/apis/<group>/<version>/<resource>/<name>/<subresource>/<key>/...`
//! requests to backend services registered through labelled ConfigMaps,
//! authenticating to each backend with the client certificate from the
//! Secret the ConfigMap references.

// Core subsystems
pub mod config;
pub mod controller;
pub mod http;
pub mod net;
pub mod registry;
pub mod routing;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::AggregatorConfig;
pub use controller::Controller;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::Registry;
