//! Upgrade-aware header handling and tunnelling.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers before forwarding
//! - Preserve `Connection: upgrade` and `Upgrade` for protocol upgrades
//! - Splice client and backend connections after `101 Switching Protocols`
//!
//! # Tunnel Lifecycle
//! ```text
//! request with Upgrade → OnUpgrade taken from the client request
//!     → forwarded; backend answers 101
//!     → 101 relayed to the client
//!     → both sides upgrade → copy_bidirectional
//!     → ends on EOF from either side or on shutdown
//! ```

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Request;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::sync::OwnedSemaphorePermit;

use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Headers meaningful only for a single transport-level connection.
static HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A pending client-side protocol upgrade.
pub struct RequestUpgrade {
    pub protocol: HeaderValue,
    pub on_upgrade: OnUpgrade,
}

/// The `Upgrade` header value, if `Connection` lists `upgrade`.
pub fn upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
    if connection_tokens(headers).any(|t| t.eq_ignore_ascii_case("upgrade")) {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

fn connection_tokens(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = connection_tokens(headers)
        .filter_map(|t| HeaderName::from_bytes(t.as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_HEADERS.iter()) {
        headers.remove(name);
    }
}

/// Prepare request headers for forwarding and detach the client upgrade, if
/// the request asks for one.
pub fn hop_by_hop_headers(req: &mut Request<Body>) -> Option<RequestUpgrade> {
    let trailers = req
        .headers()
        .get_all(header::TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("trailers"));
    let protocol = upgrade_type(req.headers());

    strip_hop_by_hop(req.headers_mut());
    if trailers {
        req.headers_mut()
            .insert(header::TE, HeaderValue::from_static("trailers"));
    }

    let protocol = protocol?;
    req.headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    req.headers_mut().insert(header::UPGRADE, protocol.clone());

    let on_upgrade = req.extensions_mut().remove::<OnUpgrade>()?;
    Some(RequestUpgrade {
        protocol,
        on_upgrade,
    })
}

/// Splice the upgraded client and backend connections in the background.
///
/// The dispatch slot is held until the tunnel closes.
pub fn spawn_tunnel(
    client: OnUpgrade,
    upstream: OnUpgrade,
    permit: OwnedSemaphorePermit,
    shutdown: &Shutdown,
    routing_key: String,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let already_stopping = shutdown.is_triggered();

    tokio::spawn(async move {
        let _permit = permit;
        if already_stopping {
            return;
        }

        let (client, upstream) = match tokio::try_join!(client, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(routing_key = %routing_key, error = %e, "Upgrade failed");
                return;
            }
        };

        metrics::upgrade_session_started();
        tracing::debug!(routing_key = %routing_key, "Upgrade tunnel established");

        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        tokio::select! {
            result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match result {
                Ok((to_backend, to_client)) => tracing::debug!(
                    routing_key = %routing_key,
                    to_backend,
                    to_client,
                    "Upgrade tunnel closed"
                ),
                Err(e) => {
                    tracing::debug!(routing_key = %routing_key, error = %e, "Upgrade tunnel error")
                }
            },
            _ = shutdown_rx.recv() => {
                tracing::debug!(routing_key = %routing_key, "Closing upgrade tunnel for shutdown");
            }
        }

        metrics::upgrade_session_ended();
    });
}
