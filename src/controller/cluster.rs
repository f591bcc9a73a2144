//! Kubernetes API adapters.
//!
//! # Responsibilities
//! - Watch ConfigMaps and translate watcher events into [`ConfigEvent`]s
//! - Fetch Secrets for the reconciler
//!
//! # Data Flow
//! ```text
//! API server watch
//!     → kube::runtime::watcher (relists + backoff)
//!     → ConfigEvent over mpsc
//!     → Controller::handle_event
//! ```

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::source::{
    ConfigEvent, ConfigObject, CredentialError, CredentialStore, SecretData,
};

/// Convert a ConfigMap into the controller's object snapshot.
pub fn config_object_from(config_map: ConfigMap) -> ConfigObject {
    let namespace = config_map.namespace().unwrap_or_default();
    let name = config_map.name_any();
    ConfigObject {
        namespace,
        name,
        labels: config_map.metadata.labels.unwrap_or_default(),
        data: config_map.data.unwrap_or_default(),
    }
}

/// Watch ConfigMaps in `namespace` (or every namespace) and forward changes.
///
/// The returned task ends when the receiver is dropped.
pub fn watch_config_maps(
    client: Client,
    namespace: Option<String>,
    buffer: usize,
) -> (mpsc::Receiver<ConfigEvent>, JoinHandle<()>) {
    let api: Api<ConfigMap> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (tx, rx) = mpsc::channel(buffer);

    let handle = tokio::spawn(async move {
        tracing::info!(
            namespace = namespace.as_deref().unwrap_or("*"),
            "Watching ConfigMaps"
        );
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        let mut stream = std::pin::pin!(stream);
        let mut listing: Option<Vec<ConfigObject>> = None;

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "ConfigMap watch error");
                    continue;
                }
            };

            let forward = match event {
                watcher::Event::Init => {
                    listing = Some(Vec::new());
                    None
                }
                watcher::Event::InitApply(cm) => {
                    listing.get_or_insert_with(Vec::new).push(config_object_from(cm));
                    None
                }
                watcher::Event::InitDone => {
                    Some(ConfigEvent::Restarted(listing.take().unwrap_or_default()))
                }
                watcher::Event::Apply(cm) => Some(ConfigEvent::Applied(config_object_from(cm))),
                watcher::Event::Delete(cm) => {
                    let object = config_object_from(cm);
                    Some(ConfigEvent::Deleted {
                        identity: object.identity(),
                        last_known: Some(object),
                    })
                }
            };

            if let Some(event) = forward {
                if tx.send(event).await.is_err() {
                    tracing::debug!("ConfigMap event receiver dropped, stopping watch");
                    break;
                }
            }
        }
    });

    (rx, handle)
}

/// Credential store reading Secrets from the API server.
#[derive(Clone)]
pub struct KubeCredentialStore {
    client: Client,
}

impl KubeCredentialStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretData, CredentialError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(secret_data(secret)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(CredentialError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(CredentialError::Api(e.to_string())),
        }
    }
}

fn secret_data(secret: Secret) -> SecretData {
    secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.0))
        .collect::<BTreeMap<_, _>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    #[test]
    fn test_config_object_from() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("search".to_string()),
                namespace: Some("open-cluster-management".to_string()),
                labels: Some(BTreeMap::from([(
                    "config".to_string(),
                    "mcm-aggregator".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("port".to_string(), "4010".to_string())])),
            ..Default::default()
        };

        let object = config_object_from(cm);
        assert_eq!(object.identity(), "open-cluster-management/search");
        assert_eq!(object.labels.get("config").map(String::as_str), Some("mcm-aggregator"));
        assert_eq!(object.data.get("port").map(String::as_str), Some("4010"));
    }

    #[test]
    fn test_secret_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([("tls.crt".to_string(), ByteString(b"pem".to_vec()))])),
            ..Default::default()
        };
        let data = secret_data(secret);
        assert_eq!(data.get("tls.crt"), Some(&b"pem".to_vec()));
        assert!(secret_data(Secret::default()).is_empty());
    }
}
