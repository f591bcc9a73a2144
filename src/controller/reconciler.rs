//! Reconciliation of ConfigMaps into routing table entries.
//!
//! # Responsibilities
//! - Keep the object cache in step with the event stream
//! - Enqueue identities whose routes may need to change
//! - Resolve a ConfigMap and its Secret into a backend descriptor
//! - Drive the registry toward the observed state, retrying failures forever
//!
//! # Design Decisions
//! - One worker drains the queue; items are processed strictly in order
//! - Deletions enqueue regardless of labels; labels only gate inclusion
//! - A missing object is the only terminal outcome besides success

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};

use crate::config::ControllerConfig;
use crate::controller::cache::ObjectCache;
use crate::controller::queue::{RateLimiter, WorkQueue};
use crate::controller::source::{ConfigEvent, ConfigObject, CredentialError, CredentialStore};
use crate::observability::metrics;
use crate::registry::{BackendDescriptor, CredentialBundle, Registry, UpsertOutcome};
use crate::routing::{LabelSelector, SelectorError};

/// ConfigMap keys every aggregator configuration must carry.
pub const REQUIRED_KEYS: [&str; 6] =
    ["service", "port", "path", "sub-resource", "use-id", "secret"];

pub const CERTIFICATE_KEY: &str = "tls.crt";
pub const PRIVATE_KEY_KEY: &str = "tls.key";
pub const TRUST_ANCHORS_KEY: &str = "ca.crt";

/// Errors resolving a ConfigMap into a descriptor. All of them are retried.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("the '{key}' key is required in configmap {object}")]
    MissingField { key: &'static str, object: String },

    #[error("the {key} reference '{value}' in configmap {object} is malformed, expected namespace/name")]
    MalformedReference {
        key: &'static str,
        value: String,
        object: String,
    },

    #[error("failed to get secret for configmap {object}: {source}")]
    Credential {
        object: String,
        #[source]
        source: CredentialError,
    },
}

/// Terminal result of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied(UpsertOutcome),
    Removed,
}

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub selector: LabelSelector,
    pub resync_period: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub qps: f64,
    pub burst: u32,
}

impl ControllerSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            selector: config.label_selector.parse()?,
            resync_period: Duration::from_secs(config.resync_secs),
            base_delay: Duration::from_millis(config.backoff.base_delay_ms),
            max_delay: Duration::from_millis(config.backoff.max_delay_ms),
            qps: config.backoff.qps,
            burst: config.backoff.burst,
        })
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            selector: LabelSelector::from_match_labels([("config", "mcm-aggregator")]),
            resync_period: Duration::from_secs(600),
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
        }
    }
}

/// Watches aggregator ConfigMaps and keeps the registry converged.
pub struct Controller {
    registry: Arc<Registry>,
    credentials: Arc<dyn CredentialStore>,
    cache: ObjectCache,
    queue: WorkQueue,
    selector: LabelSelector,
    resync_period: Duration,
    synced: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        registry: Arc<Registry>,
        credentials: Arc<dyn CredentialStore>,
        settings: ControllerSettings,
    ) -> Self {
        let limiter = RateLimiter::new(
            settings.base_delay,
            settings.max_delay,
            settings.qps,
            settings.burst,
        );
        Self {
            registry,
            credentials,
            cache: ObjectCache::new(),
            queue: WorkQueue::new(limiter),
            selector: settings.selector,
            resync_period: settings.resync_period,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Flag raised once the first full listing has been observed.
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.synced.clone()
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Run the intake loop and the single worker until shutdown or until the
    /// event stream ends.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ConfigEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(selector = %self.selector, "Starting aggregator route controller");

        let worker = {
            let controller = self.clone();
            tokio::spawn(async move {
                while controller.process_next_work_item().await {}
            })
        };

        let mut resync = time::interval_at(Instant::now() + self.resync_period, self.resync_period);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::warn!("ConfigMap event stream closed");
                        break;
                    }
                },
                _ = resync.tick() => self.resync(),
                _ = shutdown.recv() => {
                    tracing::info!("Controller received shutdown signal");
                    break;
                }
            }
        }

        self.queue.shut_down();
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Controller worker terminated abnormally");
        }
        tracing::info!("Shutting down aggregator route controller");
    }

    /// Apply one notification to the cache and enqueue affected identities.
    pub fn handle_event(&self, event: ConfigEvent) {
        match event {
            ConfigEvent::Applied(object) => {
                let identity = object.identity();
                let admitted = self.selector.matches(&object.labels);
                let previously_admitted = self
                    .cache
                    .insert(object)
                    .is_some_and(|old| self.selector.matches(&old.labels));

                if admitted || previously_admitted {
                    self.queue.add(identity);
                } else {
                    tracing::trace!(
                        identity = %identity,
                        "Ignoring ConfigMap without aggregator labels"
                    );
                }
            }
            ConfigEvent::Deleted { identity, .. } => {
                self.cache.remove(&identity);
                self.queue.add(identity);
            }
            ConfigEvent::Restarted(objects) => {
                let listed = objects.len();
                let mut previous = self.cache.replace_all(objects);

                for object in self.cache.matching(&self.selector) {
                    previous.remove(&object.identity());
                    self.queue.add(object.identity());
                }
                for (identity, old) in previous {
                    let vanished = self.cache.get(&identity).is_none();
                    if vanished || self.selector.matches(&old.labels) {
                        self.queue.add(identity);
                    }
                }

                if !self.synced.swap(true, Ordering::AcqRel) {
                    tracing::info!(objects = listed, "ConfigMap cache synced");
                }
            }
        }
    }

    /// Enqueue every cached object that passes the label filter.
    pub fn resync(&self) {
        let objects = self.cache.matching(&self.selector);
        tracing::debug!(objects = objects.len(), "Periodic resync");
        for object in objects {
            self.queue.add(object.identity());
        }
    }

    /// Take one key off the queue and sync it. Returns false once the queue
    /// has shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.sync(&key).await {
            Ok(outcome) => {
                self.queue.forget(&key);
                metrics::record_reconcile("success");
                if outcome == SyncOutcome::Applied(UpsertOutcome::Unchanged) {
                    tracing::debug!(key = %key, "Aggregator configmap unchanged");
                } else {
                    tracing::info!(
                        key = %key,
                        outcome = ?outcome,
                        "Successfully synced aggregator configmap"
                    );
                }
            }
            Err(e) => {
                self.queue.add_rate_limited(key.clone());
                metrics::record_reconcile("error");
                tracing::warn!(
                    key = %key,
                    error = %e,
                    requeues = self.queue.num_requeues(&key),
                    "Error syncing aggregator configmap, requeuing"
                );
            }
        }

        self.queue.done(&key);
        true
    }

    /// Converge the registry entry produced by the ConfigMap `identity`.
    pub async fn sync(&self, identity: &str) -> Result<SyncOutcome, ReconcileError> {
        let object = match self.cache.get(identity) {
            Some(object) if self.selector.matches(&object.labels) => object,
            Some(_) => {
                tracing::debug!(
                    identity = %identity,
                    "ConfigMap no longer selected, removing route"
                );
                self.registry.remove_by_source(identity);
                return Ok(SyncOutcome::Removed);
            }
            None => {
                self.registry.remove_by_source(identity);
                return Ok(SyncOutcome::Removed);
            }
        };

        let descriptor = self.resolve(&object).await?;
        Ok(SyncOutcome::Applied(self.registry.upsert(descriptor)))
    }

    /// Validate a ConfigMap and fetch its credentials.
    pub async fn resolve(
        &self,
        object: &ConfigObject,
    ) -> Result<BackendDescriptor, ReconcileError> {
        let identity = object.identity();

        for key in REQUIRED_KEYS {
            if !object.data.contains_key(key) {
                return Err(ReconcileError::MissingField {
                    key,
                    object: identity,
                });
            }
        }
        let field = |key: &'static str| {
            object.data.get(key).map(String::as_str).unwrap_or_default()
        };

        let (service_namespace, service_name) =
            split_reference("service", field("service"), None, &identity)?;
        let (secret_namespace, secret_name) =
            split_reference("secret", field("secret"), Some(&object.namespace), &identity)?;

        let mut secret = self
            .credentials
            .get_secret(&secret_namespace, &secret_name)
            .await
            .map_err(|source| ReconcileError::Credential {
                object: identity.clone(),
                source,
            })?;

        let credentials = CredentialBundle {
            certificate: secret.remove(CERTIFICATE_KEY).unwrap_or_default(),
            private_key: secret.remove(PRIVATE_KEY_KEY).unwrap_or_default(),
            trust_anchors: secret.remove(TRUST_ANCHORS_KEY).unwrap_or_default(),
        };

        Ok(BackendDescriptor {
            source_identity: identity,
            routing_key: field("sub-resource").trim_matches('/').to_string(),
            service_name,
            service_namespace,
            service_port: field("port").to_string(),
            base_path: field("path").trim_matches('/').to_string(),
            use_identifier_segment: field("use-id") == "true",
            credentials,
        })
    }
}

/// Split a `namespace/name` reference. A bare `name` takes `default_namespace`
/// when one is allowed.
fn split_reference(
    key: &'static str,
    value: &str,
    default_namespace: Option<&str>,
    object: &str,
) -> Result<(String, String), ReconcileError> {
    let malformed = || ReconcileError::MalformedReference {
        key,
        value: value.to_string(),
        object: object.to_string(),
    };

    let (namespace, name) = match value.split('/').collect::<Vec<_>>().as_slice() {
        [name] => ("", *name),
        [namespace, name] => (*namespace, *name),
        _ => return Err(malformed()),
    };
    if name.is_empty() {
        return Err(malformed());
    }

    let namespace = match (namespace, default_namespace) {
        ("", Some(default)) if !default.is_empty() => default,
        ("", _) => return Err(malformed()),
        (namespace, _) => namespace,
    };

    Ok((namespace.to_string(), name.to_string()))
}
