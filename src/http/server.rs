//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the connect route and probes
//! - Wire up middleware (tracing, request ID)
//! - Serve plain or TLS listeners until shutdown

use axum::body::Body;
use axum::extract::{FromRef, State};
use axum::http::{Method, Request, StatusCode};
use axum::routing::{get, MethodFilter, MethodRouter};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::http::dispatcher::{connect_handler, method_not_allowed, Dispatcher};
use crate::http::request::{self, request_id_header, UuidRequestId};
use crate::lifecycle::Shutdown;

/// How long TLS connections get to finish once shutdown starts.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("method '{0}' cannot be routed")]
    InvalidMethod(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Raised once the controller has seen its first full listing.
    pub ready: Arc<AtomicBool>,
}

impl FromRef<AppState> for Dispatcher {
    fn from_ref(state: &AppState) -> Self {
        state.dispatcher.clone()
    }
}

/// HTTP server for the aggregator proxy.
pub struct HttpServer {
    router: Router,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server serving the connect route described by `api`.
    pub fn new(api: &ApiConfig, state: AppState, shutdown: Shutdown) -> Result<Self, ServerError> {
        let router = Self::build_router(api, state)?;
        Ok(Self { router, shutdown })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(api: &ApiConfig, state: AppState) -> Result<Router, ServerError> {
        let mut connect: MethodRouter<AppState> = MethodRouter::new();
        for name in &api.methods {
            let filter = Method::from_bytes(name.as_bytes())
                .ok()
                .and_then(|m| MethodFilter::try_from(m).ok())
                .ok_or_else(|| ServerError::InvalidMethod(name.clone()))?;
            connect = connect.on(filter, connect_handler);
        }
        let connect = connect.fallback(method_not_allowed);

        let prefix = api.route_prefix();
        tracing::debug!(prefix = %prefix, methods = ?api.methods, "Mounting connect route");

        let router = Router::new()
            .route(&prefix, connect.clone())
            .route(&format!("{prefix}/{{*path}}"), connect)
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(request_id_header()))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id = %request::request_id(req.headers()),
                )
            }))
            .layer(SetRequestIdLayer::new(request_id_header(), UuidRequestId));

        Ok(router)
    }

    /// The fully layered router, for serving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS termination on `addr`.
    pub async fn run_tls(self, addr: SocketAddr, tls: RustlsConfig) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        {
            let handle = handle.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.wait().await;
                handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
            });
        }

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.ready.load(Ordering::Acquire) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controller not synced")
    }
}
