//! Request path parsing.
//!
//! Connect requests follow the shape
//! `/apis/<group>/<version>/<resource>/<name>/<anchor>/<routing-key>/<remaining...>`.
//! The routing key is the 7th segment and `<name>` (5th) is the identifier
//! that backends in identifier mode expect in their path.

use thiserror::Error;

/// Number of segments up to and including the routing key.
const MIN_SEGMENTS: usize = 7;
const IDENTIFIER_INDEX: usize = 4;
const ROUTING_KEY_INDEX: usize = 6;

/// Errors produced while parsing a connect request path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("wrong path format: expected at least {MIN_SEGMENTS} segments, got {0}")]
    TooShort(usize),
}

/// The routing-relevant parts of a connect request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPath {
    /// Segment used as the registry key.
    pub routing_key: String,
    /// Parent resource name, spliced into the upstream path in identifier mode.
    pub identifier: String,
    /// Segments after the routing key, joined with `/`, without leading slash.
    pub remaining: String,
}

/// Split a request path into its routing-relevant parts.
pub fn parse_proxy_path(request_path: &str) -> Result<ProxyPath, PathError> {
    let trimmed = request_path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.len() < MIN_SEGMENTS {
        return Err(PathError::TooShort(parts.len()));
    }

    Ok(ProxyPath {
        routing_key: parts[ROUTING_KEY_INDEX].to_string(),
        identifier: parts[IDENTIFIER_INDEX].to_string(),
        remaining: parts[MIN_SEGMENTS..].join("/"),
    })
}

/// Extract only the routing key from a request path.
pub fn parse_routing_key(request_path: &str) -> Result<String, PathError> {
    parse_proxy_path(request_path).map(|p| p.routing_key)
}

/// Join path components into an absolute path, skipping empty ones.
///
/// Always returns at least `/`.
pub fn join_path<'a>(components: impl IntoIterator<Item = &'a str>) -> String {
    let mut path = String::new();
    for component in components {
        let component = component.trim_matches('/');
        if component.is_empty() {
            continue;
        }
        path.push('/');
        path.push_str(component);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}
