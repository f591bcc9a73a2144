//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! aggregator proxy. All types derive Serde traits for deserialization from
//! config files, and every section falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Root configuration for the aggregator proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Listener configuration (bind address, TLS, dispatch slots).
    pub listener: ListenerConfig,

    /// Resource path the connect route is mounted under.
    pub api: ApiConfig,

    /// ConfigMap watch and reconciliation settings.
    pub controller: ControllerConfig,

    /// Backend connection settings.
    pub upstream: UpstreamConfig,

    pub kubernetes: KubernetesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrently proxied requests, upgrade sessions included.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Aggregated API coordinates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub subresource: String,
    /// HTTP methods accepted by the connect route.
    pub methods: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            group: "aggregation.open-cluster-management.io".to_string(),
            version: "v1".to_string(),
            resource: "clusterstatuses".to_string(),
            subresource: "aggregator".to_string(),
            methods: ["GET", "POST", "PUT", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl ApiConfig {
    /// Path of the connect route without the trailing remaining-path capture.
    pub fn route_prefix(&self) -> String {
        format!(
            "/apis/{}/{}/{}/{{name}}/{}",
            self.group, self.version, self.resource, self.subresource
        )
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Label selector ConfigMaps must satisfy.
    pub label_selector: String,

    /// Namespace to watch. Unset watches every namespace.
    pub namespace: Option<String>,

    /// Period between full resyncs of the cached ConfigMaps.
    pub resync_secs: u64,

    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            label_selector: "config=mcm-aggregator".to_string(),
            namespace: None,
            resync_secs: 600,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Work item retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry of a failing item.
    pub base_delay_ms: u64,

    /// Per-item delay cap.
    pub max_delay_ms: u64,

    /// Overall retry rate across all items.
    pub qps: f64,

    pub burst: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            qps: 10.0,
            burst: 100,
        }
    }
}

/// Backend connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// TCP connect timeout toward backends.
    pub connect_timeout_secs: u64,

    /// Static host → address overrides consulted before DNS.
    pub resolve: HashMap<String, IpAddr>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            resolve: HashMap::new(),
        }
    }
}

/// Kubernetes client configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Kubeconfig path. Unset uses the in-cluster or default configuration.
    pub kubeconfig: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// Bearer token required by every admin endpoint.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
