//! Interfaces between the controller and the cluster.
//!
//! The controller consumes a channel of typed [`ConfigEvent`]s and resolves
//! credential references through a [`CredentialStore`]. Both are implemented
//! against the Kubernetes API in `cluster.rs`; tests feed them directly.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw key → bytes contents of a credential object.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Snapshot of a watched configuration object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigObject {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

impl ConfigObject {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style label setter.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder-style data setter.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// `<namespace>/<name>`, or just the name for cluster-scoped objects.
    pub fn identity(&self) -> String {
        object_identity(&self.namespace, &self.name)
    }
}

pub fn object_identity(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

/// A change notification for configuration objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// Object added or modified.
    Applied(ConfigObject),
    /// Object deleted. The final state may be unknown or stale.
    Deleted {
        identity: String,
        last_known: Option<ConfigObject>,
    },
    /// Full listing of every object currently present (initial sync or relist).
    Restarted(Vec<ConfigObject>),
}

/// Errors fetching a credential object.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("API error: {0}")]
    Api(String),
}

/// Lookup of credential objects by reference.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretData, CredentialError>;
}

/// Credential store backed by an in-process map.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    secrets: DashMap<String, SecretData>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str, data: SecretData) {
        self.secrets.insert(object_identity(namespace, name), data);
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.secrets.remove(&object_identity(namespace, name));
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretData, CredentialError> {
        self.secrets
            .get(&object_identity(namespace, name))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CredentialError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
