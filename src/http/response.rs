//! Error responses.
//!
//! # Responsibilities
//! - Map dispatch failures to HTTP status codes
//! - Render failures as Kubernetes `Status` objects
//!
//! # Design Decisions
//! - Every failure the proxy itself produces carries a `Status` JSON body
//! - Backend timeouts result in 504, unreachable backends in 503

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::net::TlsError;
use crate::routing::PathError;

/// Kubernetes `Status` object as returned by API servers on failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub kind: &'static str,
    pub api_version: &'static str,
    pub metadata: ListMeta,
    pub status: &'static str,
    pub message: String,
    pub reason: &'static str,
    pub code: u16,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListMeta {}

impl Status {
    pub fn failure(code: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: "Status",
            api_version: "v1",
            metadata: ListMeta::default(),
            status: "Failure",
            message: message.into(),
            reason,
            code: code.as_u16(),
        }
    }
}

impl IntoResponse for Status {
    fn into_response(self) -> Response {
        let code = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (code, Json(self)).into_response()
    }
}

/// Per-request dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("the request {path} is forbidden: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: PathError,
    },

    #[error("the aggregator service ({0}) is not found")]
    UnknownRoute(String),

    #[error("failed to build transport for aggregator service ({routing_key}): {source}")]
    Transport {
        routing_key: String,
        #[source]
        source: TlsError,
    },

    #[error("failed to build upstream location: {0}")]
    InvalidUpstream(String),

    #[error("the aggregator service ({routing_key}) is unavailable: {message}")]
    Unavailable { routing_key: String, message: String },

    #[error("timed out connecting to the aggregator service ({0})")]
    Timeout(String),

    #[error("the proxy is shutting down")]
    ShuttingDown,

    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::InvalidPath { .. } => StatusCode::FORBIDDEN,
            DispatchError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            DispatchError::Transport { .. } | DispatchError::InvalidUpstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DispatchError::Unavailable { .. } | DispatchError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn reason(&self) -> &'static str {
        match self.status_code() {
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "NotFound",
            StatusCode::METHOD_NOT_ALLOWED => "MethodNotAllowed",
            StatusCode::SERVICE_UNAVAILABLE => "ServiceUnavailable",
            StatusCode::GATEWAY_TIMEOUT => "Timeout",
            _ => "InternalError",
        }
    }

    pub fn to_status(&self) -> Status {
        Status::failure(self.status_code(), self.reason(), self.to_string())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        self.to_status().into_response()
    }
}
