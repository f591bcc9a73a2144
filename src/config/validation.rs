//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, rates > 0)
//! - Check that addresses, selectors and methods parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AggregatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::Method;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AggregatorConfig;
use crate::routing::LabelSelector;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &AggregatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are both required",
            ));
        }
    }

    let api = &config.api;
    for (field, value) in [
        ("api.group", &api.group),
        ("api.version", &api.version),
        ("api.resource", &api.resource),
        ("api.subresource", &api.subresource),
    ] {
        if value.is_empty() || value.contains('/') {
            errors.push(ValidationError::new(field, "must be a single non-empty path segment"));
        }
    }
    if api.methods.is_empty() {
        errors.push(ValidationError::new("api.methods", "at least one method is required"));
    }
    for method in &api.methods {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "api.methods",
                format!("'{}' is not an HTTP method", method),
            ));
        }
    }

    let controller = &config.controller;
    if let Err(e) = controller.label_selector.parse::<LabelSelector>() {
        errors.push(ValidationError::new("controller.label_selector", e.to_string()));
    }
    if controller.resync_secs == 0 {
        errors.push(ValidationError::new("controller.resync_secs", "must be greater than 0"));
    }
    let backoff = &controller.backoff;
    if backoff.base_delay_ms == 0 {
        errors.push(ValidationError::new(
            "controller.backoff.base_delay_ms",
            "must be greater than 0",
        ));
    }
    if backoff.max_delay_ms < backoff.base_delay_ms {
        errors.push(ValidationError::new(
            "controller.backoff.max_delay_ms",
            "must not be below base_delay_ms",
        ));
    }
    if !(backoff.qps > 0.0 && backoff.qps.is_finite()) {
        errors.push(ValidationError::new("controller.backoff.qps", "must be a positive number"));
    }
    if backoff.burst == 0 {
        errors.push(ValidationError::new("controller.backoff.burst", "must be greater than 0"));
    }

    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "upstream.connect_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a socket address", value),
        ));
    }
}
