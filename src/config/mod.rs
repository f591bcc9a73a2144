//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AggregatorConfig (validated, immutable)
//!     → CLI overrides applied in main.rs
//!     → handed to lifecycle::startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; routing changes arrive through the
//!   cluster, not through this file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AggregatorConfig, ApiConfig, BackoffConfig, ControllerConfig, KubernetesConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, TlsConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
