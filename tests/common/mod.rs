//! Shared utilities for integration testing.
//!
//! Provides a throwaway PKI, a mutual-TLS echo backend with WebSocket
//! support, and an in-process proxy wired to an in-memory credential store.

#![allow(dead_code)]

use aggregator_proxy::config::ApiConfig;
use aggregator_proxy::controller::{
    ConfigEvent, ConfigObject, Controller, ControllerSettings, InMemoryCredentialStore, SecretData,
};
use aggregator_proxy::http::{AppState, Dispatcher, HttpServer};
use aggregator_proxy::lifecycle::Shutdown;
use aggregator_proxy::net::{ServiceResolver, TransportCache};
use aggregator_proxy::registry::Registry;
use axum::body::Body;
use futures_util::{SinkExt, StreamExt};
use hyper::body::Incoming;
use hyper::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

pub const BACKEND_HOST: &str = "echo.default.svc";
pub const SECRET_NAMESPACE: &str = "default";
pub const SECRET_NAME: &str = "echo-client-certs";
pub const DISPATCH_SLOTS: usize = 64;
pub const CONNECT_PREFIX: &str =
    "/apis/aggregation.open-cluster-management.io/v1/clusterstatuses/cluster1/aggregator";

/// One issuing CA plus a server and a client certificate signed by it.
pub struct TestPki {
    pub ca_pem: String,
    pub ca_der: CertificateDer<'static>,
    pub server_der: CertificateDer<'static>,
    pub server_key_der: Vec<u8>,
    pub client_pem: String,
    pub client_key_pem: String,
}

fn ca() -> (rcgen::Certificate, rcgen::KeyPair) {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![
        rcgen::KeyUsagePurpose::KeyCertSign,
        rcgen::KeyUsagePurpose::CrlSign,
        rcgen::KeyUsagePurpose::DigitalSignature,
    ];
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "aggregator test ca");
    let cert = params.self_signed(&key).unwrap();
    (cert, key)
}

fn leaf(
    names: &[&str],
    usage: rcgen::ExtendedKeyUsagePurpose,
    ca: &rcgen::Certificate,
    ca_key: &rcgen::KeyPair,
) -> (rcgen::Certificate, rcgen::KeyPair) {
    let key = rcgen::KeyPair::generate().unwrap();
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = rcgen::CertificateParams::new(names.clone()).unwrap();
    params.extended_key_usages = vec![usage];
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, names[0].as_str());
    let cert = params.signed_by(&key, ca, ca_key).unwrap();
    (cert, key)
}

impl TestPki {
    pub fn generate() -> Self {
        let (ca, ca_key) = ca();
        let (server, server_key) = leaf(
            &[BACKEND_HOST],
            rcgen::ExtendedKeyUsagePurpose::ServerAuth,
            &ca,
            &ca_key,
        );
        let (client, client_key) = leaf(
            &["aggregator-proxy"],
            rcgen::ExtendedKeyUsagePurpose::ClientAuth,
            &ca,
            &ca_key,
        );

        Self {
            ca_pem: ca.pem(),
            ca_der: ca.der().clone(),
            server_der: server.der().clone(),
            server_key_der: server_key.serialize_der(),
            client_pem: client.pem(),
            client_key_pem: client_key.serialize_pem(),
        }
    }

    /// Secret contents as the controller expects them.
    pub fn secret(&self) -> SecretData {
        let mut data = SecretData::new();
        data.insert("tls.crt".to_string(), self.client_pem.clone().into_bytes());
        data.insert("tls.key".to_string(), self.client_key_pem.clone().into_bytes());
        data.insert("ca.crt".to_string(), self.ca_pem.clone().into_bytes());
        data
    }
}

/// A running mutual-TLS echo backend.
pub struct Backend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    /// WebSocket sessions whose stream has ended on the backend side.
    pub sessions_closed: Arc<AtomicUsize>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }
}

/// Start a backend that requires a client certificate issued by `pki`'s CA.
///
/// Plain requests are answered with a JSON description of what arrived;
/// WebSocket upgrades echo every data frame back.
pub async fn spawn_backend(pki: &TestPki) -> Backend {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(pki.ca_der.clone()).unwrap();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .unwrap();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pki.server_key_der.clone()));
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![pki.server_der.clone()], key)
        .unwrap();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let sessions_closed = Arc::new(AtomicUsize::new(0));

    let counters = (hits.clone(), sessions_closed.clone());
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let (hits, closed) = counters.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(socket).await else {
                    return;
                };
                let service = service_fn(move |req| handle(req, hits.clone(), closed.clone()));
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .with_upgrades()
                    .await;
            });
        }
    });

    Backend {
        addr,
        hits,
        sessions_closed,
    }
}

async fn handle(
    mut req: Request<Incoming>,
    hits: Arc<AtomicUsize>,
    sessions_closed: Arc<AtomicUsize>,
) -> Result<Response<Body>, Infallible> {
    hits.fetch_add(1, Ordering::SeqCst);

    let wants_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if wants_websocket {
        let key = req
            .headers()
            .get("sec-websocket-key")
            .map(|v| v.as_bytes().to_vec())
            .unwrap_or_default();
        let on_upgrade = hyper::upgrade::on(&mut req);
        tokio::spawn(async move {
            let Ok(upgraded) = on_upgrade.await else {
                return;
            };
            let io = TokioIo::new(upgraded);
            let mut ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
                if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
                    break;
                }
            }
            drop(ws);
            sessions_closed.fetch_add(1, Ordering::SeqCst);
        });

        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "websocket")
            .header("sec-websocket-accept", derive_accept_key(&key))
            .body(Body::empty())
            .unwrap();
        return Ok(response);
    }

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(Body::new(body), 1 << 20)
        .await
        .unwrap_or_default();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let echo = serde_json::json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "forwarded_for": header("x-forwarded-for"),
        "host": header("host"),
        "proxy_authorization": header("proxy-authorization"),
        "custom": header("x-custom"),
        "body": String::from_utf8_lossy(&body),
    });

    Ok(Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(echo.to_string()))
        .unwrap())
}

/// Aggregator ConfigMap routing `routing_key` to the echo backend on `port`.
pub fn echo_configmap(name: &str, routing_key: &str, port: u16, use_id: bool) -> ConfigObject {
    ConfigObject::new("open-cluster-management", name)
        .with_label("config", "mcm-aggregator")
        .with_data("service", "default/echo")
        .with_data("port", port.to_string())
        .with_data("path", "/echoapi/")
        .with_data("sub-resource", routing_key)
        .with_data("use-id", if use_id { "true" } else { "false" })
        .with_data("secret", format!("{SECRET_NAMESPACE}/{SECRET_NAME}"))
}

/// An in-process proxy serving on a loopback port.
pub struct Proxy {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub controller: Arc<Controller>,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub dispatcher: Dispatcher,
    pub shutdown: Shutdown,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Feed `event` to the controller and process the queue until it is empty.
    pub async fn apply(&self, event: ConfigEvent) {
        self.controller.handle_event(event);
        converge(&self.controller).await;
    }
}

pub async fn converge(controller: &Controller) {
    while !controller.queue().is_empty() {
        tokio::time::timeout(Duration::from_secs(5), controller.process_next_work_item())
            .await
            .expect("work item should be processed");
    }
}

pub fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_secs(1),
        qps: 1000.0,
        burst: 1000,
        ..ControllerSettings::default()
    }
}

/// Start a proxy whose resolver maps the echo service to loopback and whose
/// credential store holds `pki`'s client identity.
pub async fn spawn_proxy(pki: &TestPki) -> Proxy {
    let registry = Arc::new(Registry::new());
    let credentials = Arc::new(InMemoryCredentialStore::new());
    credentials.insert(SECRET_NAMESPACE, SECRET_NAME, pki.secret());
    let controller = Arc::new(Controller::new(
        registry.clone(),
        credentials.clone(),
        fast_settings(),
    ));

    let mut overrides = HashMap::new();
    overrides.insert(BACKEND_HOST.to_string(), "127.0.0.1".parse().unwrap());
    let transports = Arc::new(TransportCache::new(
        ServiceResolver::new(overrides),
        Duration::from_secs(2),
    ));

    let shutdown = Shutdown::new();
    let dispatcher = Dispatcher::new(
        registry.clone(),
        transports,
        DISPATCH_SLOTS,
        shutdown.clone(),
    );
    let state = AppState {
        dispatcher: dispatcher.clone(),
        ready: controller.readiness(),
    };
    let server = HttpServer::new(&ApiConfig::default(), state, shutdown.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));

    Proxy {
        addr,
        registry,
        controller,
        credentials,
        dispatcher,
        shutdown,
    }
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// HTTP client that ignores proxy environment variables.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
