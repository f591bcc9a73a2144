//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (watch, controller, metrics, admin)
//! - Bind listeners and begin accepting traffic
//! - Tear everything down in order once shutdown is triggered
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last; `/readyz` reports the controller's first sync

use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::Client;
use metrics_exporter_prometheus::BuildError;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing_subscriber::util::TryInitError;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{AggregatorConfig, KubernetesConfig};
use crate::controller::{watch_config_maps, Controller, ControllerSettings, KubeCredentialStore};
use crate::http::{AppState, Dispatcher, HttpServer, ServerError};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::net::{load_tls_config, ServiceResolver, TransportCache};
use crate::observability::{logging, metrics};
use crate::registry::Registry;
use crate::routing::SelectorError;

/// Capacity of the watch → controller event channel.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] TryInitError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to create Kubernetes client: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid label selector: {0}")]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid address '{0}'")]
    Address(String),
}

/// Build a Kubernetes client from an explicit kubeconfig, or fall back to the
/// in-cluster / default configuration.
pub async fn kube_client(config: &KubernetesConfig) -> Result<Client, StartupError> {
    match &config.kubeconfig {
        Some(path) => {
            tracing::info!(path = %path, "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(Path::new(path))?;
            let options = KubeConfigOptions::default();
            let client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
            Ok(Client::try_from(client_config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

fn parse_addr(value: &str) -> Result<SocketAddr, StartupError> {
    value
        .parse()
        .map_err(|_| StartupError::Address(value.to_string()))
}

/// Run the aggregator proxy until a termination signal arrives.
pub async fn run(config: AggregatorConfig) -> Result<(), StartupError> {
    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "aggregator-proxy starting");

    // Process-wide provider for the listener's rustls server config.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if config.observability.metrics_enabled {
        metrics::init_metrics(parse_addr(&config.observability.metrics_address)?)?;
    }

    let client = kube_client(&config.kubernetes).await?;

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());

    let registry = Arc::new(Registry::new());
    let settings = ControllerSettings::from_config(&config.controller)?;
    let controller = Arc::new(Controller::new(
        registry.clone(),
        Arc::new(KubeCredentialStore::new(client.clone())),
        settings,
    ));
    let ready = controller.readiness();
    let queue = controller.queue().clone();

    let (events, watch) =
        watch_config_maps(client, config.controller.namespace.clone(), EVENT_BUFFER);
    let controller_task = tokio::spawn(controller.run(events, shutdown.subscribe()));

    let transports = Arc::new(TransportCache::new(
        ServiceResolver::new(config.upstream.resolve.clone()),
        Duration::from_secs(config.upstream.connect_timeout_secs),
    ));
    let dispatcher = Dispatcher::new(
        registry.clone(),
        transports,
        config.listener.max_connections,
        shutdown.clone(),
    );
    let state = AppState {
        dispatcher,
        ready: ready.clone(),
    };
    let server = HttpServer::new(&config.api, state, shutdown.clone())?;

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(AdminState {
            registry,
            queue,
            ready,
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    let served = match &config.listener.tls {
        Some(tls) => {
            let addr = parse_addr(&config.listener.bind_address)?;
            let rustls =
                load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
            server.run_tls(addr, rustls).await
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener).await
        }
    };

    // The server only returns on shutdown or failure; make sure everything else stops too.
    shutdown.trigger();
    signals.abort();
    watch.abort();
    if let Err(e) = controller_task.await {
        tracing::error!(error = %e, "Controller task failed");
    }
    if let Some(admin) = admin_task {
        let _ = admin.await;
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
