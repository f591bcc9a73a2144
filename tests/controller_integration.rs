//! Controller → registry convergence through the public API.

mod common;

use aggregator_proxy::controller::{
    ConfigEvent, ConfigObject, Controller, InMemoryCredentialStore, SecretData, SyncOutcome,
};
use aggregator_proxy::registry::{Registry, UpsertOutcome};
use common::{converge, echo_configmap, fast_settings, SECRET_NAME, SECRET_NAMESPACE};
use std::sync::Arc;
use std::time::Duration;

const IDENTITY: &str = "open-cluster-management/echo-aggregator";

fn secret() -> SecretData {
    let mut data = SecretData::new();
    data.insert("tls.crt".to_string(), b"cert".to_vec());
    data.insert("tls.key".to_string(), b"key".to_vec());
    data.insert("ca.crt".to_string(), b"ca".to_vec());
    data
}

fn setup() -> (Arc<Registry>, Arc<InMemoryCredentialStore>, Controller) {
    let registry = Arc::new(Registry::new());
    let credentials = Arc::new(InMemoryCredentialStore::new());
    credentials.insert(SECRET_NAMESPACE, SECRET_NAME, secret());
    let controller = Controller::new(registry.clone(), credentials.clone(), fast_settings());
    (registry, credentials, controller)
}

fn configmap() -> ConfigObject {
    echo_configmap("echo-aggregator", "echo", 8443, false)
}

async fn process_one(controller: &Controller) {
    tokio::time::timeout(Duration::from_secs(5), controller.process_next_work_item())
        .await
        .expect("work item should arrive");
}

#[tokio::test]
async fn test_configmap_round_trip() {
    let (registry, _credentials, controller) = setup();

    controller.handle_event(ConfigEvent::Restarted(vec![configmap()]));
    converge(&controller).await;

    assert!(controller.has_synced());
    let descriptor = registry.lookup("echo").unwrap();
    assert_eq!(descriptor.source_identity, IDENTITY);
    assert_eq!(descriptor.service_host(), "echo.default.svc");
    assert_eq!(descriptor.service_port, "8443");
    assert_eq!(descriptor.base_path, "echoapi");
    assert!(!descriptor.use_identifier_segment);
    assert_eq!(descriptor.credentials.certificate, b"cert");
    assert_eq!(descriptor.credentials.private_key, b"key");
    assert_eq!(descriptor.credentials.trust_anchors, b"ca");
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    let (registry, _credentials, controller) = setup();
    controller.handle_event(ConfigEvent::Restarted(vec![configmap()]));
    converge(&controller).await;
    let before = registry.lookup("echo").unwrap();

    controller.resync();
    assert_eq!(controller.queue().len(), 1);
    converge(&controller).await;

    let after = registry.lookup("echo").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(
        controller.sync(IDENTITY).await.unwrap(),
        SyncOutcome::Applied(UpsertOutcome::Unchanged)
    );
}

#[tokio::test]
async fn test_deletion_removes_route() {
    let (registry, _credentials, controller) = setup();
    controller.handle_event(ConfigEvent::Restarted(vec![configmap()]));
    converge(&controller).await;

    controller.handle_event(ConfigEvent::Deleted {
        identity: IDENTITY.to_string(),
        last_known: Some(configmap()),
    });
    converge(&controller).await;

    assert!(registry.lookup("echo").is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_missing_secret_is_retried_until_present() {
    let (registry, credentials, controller) = setup();
    credentials.remove(SECRET_NAMESPACE, SECRET_NAME);

    controller.handle_event(ConfigEvent::Applied(configmap()));
    process_one(&controller).await;
    assert_eq!(controller.queue().num_requeues(IDENTITY), 1);
    assert!(registry.is_empty());

    // The rate-limited re-add arrives after its delay.
    process_one(&controller).await;
    assert_eq!(controller.queue().num_requeues(IDENTITY), 2);
    assert!(registry.is_empty());

    credentials.insert(SECRET_NAMESPACE, SECRET_NAME, secret());
    process_one(&controller).await;
    assert_eq!(controller.queue().num_requeues(IDENTITY), 0);
    assert!(registry.lookup("echo").is_some());
}

#[tokio::test]
async fn test_incomplete_configmap_is_not_registered() {
    let (registry, _credentials, controller) = setup();
    let mut incomplete = configmap();
    incomplete.data.remove("secret");

    controller.handle_event(ConfigEvent::Applied(incomplete));
    process_one(&controller).await;

    assert!(registry.is_empty());
    assert_eq!(controller.queue().num_requeues(IDENTITY), 1);
}

#[tokio::test]
async fn test_unlabelled_configmap_is_ignored() {
    let (registry, _credentials, controller) = setup();
    let mut unlabelled = configmap();
    unlabelled.labels.clear();

    controller.handle_event(ConfigEvent::Applied(unlabelled));

    assert!(controller.queue().is_empty());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_label_loss_removes_route() {
    let (registry, _credentials, controller) = setup();
    controller.handle_event(ConfigEvent::Applied(configmap()));
    converge(&controller).await;
    assert!(registry.lookup("echo").is_some());

    let mut relabelled = configmap();
    relabelled.labels.insert("config".to_string(), "something-else".to_string());
    controller.handle_event(ConfigEvent::Applied(relabelled));
    converge(&controller).await;

    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_relist_drops_vanished_objects() {
    let (registry, _credentials, controller) = setup();
    let other = echo_configmap("other-aggregator", "other", 9443, true);
    controller.handle_event(ConfigEvent::Restarted(vec![configmap(), other.clone()]));
    converge(&controller).await;
    assert_eq!(registry.len(), 2);

    controller.handle_event(ConfigEvent::Restarted(vec![other]));
    converge(&controller).await;

    assert!(registry.lookup("echo").is_none());
    let other = registry.lookup("other").unwrap();
    assert!(other.use_identifier_segment);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_routing_key_change_moves_route() {
    let (registry, _credentials, controller) = setup();
    controller.handle_event(ConfigEvent::Applied(configmap()));
    converge(&controller).await;

    let moved = echo_configmap("echo-aggregator", "echo-v2", 8443, false);
    controller.handle_event(ConfigEvent::Applied(moved));
    converge(&controller).await;

    assert!(registry.lookup("echo").is_none());
    assert_eq!(registry.lookup("echo-v2").unwrap().source_identity, IDENTITY);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_secret_rotation_replaces_descriptor() {
    let (registry, credentials, controller) = setup();
    controller.handle_event(ConfigEvent::Applied(configmap()));
    converge(&controller).await;

    let mut rotated = secret();
    rotated.insert("tls.crt".to_string(), b"rotated".to_vec());
    credentials.insert(SECRET_NAMESPACE, SECRET_NAME, rotated);

    controller.resync();
    converge(&controller).await;

    assert_eq!(registry.lookup("echo").unwrap().credentials.certificate, b"rotated");
}
