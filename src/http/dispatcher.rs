//! Request dispatch to aggregated backends.
//!
//! # Responsibilities
//! - Extract the routing key from the connect path
//! - Resolve the backend through the registry
//! - Rewrite the request for the backend and forward it over mutual TLS
//! - Hand upgraded connections to the tunnel
//!
//! # Data Flow
//! ```text
//! /apis/<g>/<v>/<resource>/<name>/<sub>/<key>/<rest...>?<query>
//!     → parse_proxy_path → registry lookup(key)       (403 / 404)
//!     → dispatch slot                                  (waits when saturated)
//!     → transport cache → mTLS client                  (500)
//!     → https://<svc>.<ns>.svc:<port>/<base>[/<name>]/<rest>?<query>
//!     → response, or 101 → tunnel                      (503 / 504)
//! ```

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::http::request;
use crate::http::response::DispatchError;
use crate::http::upgrade::{self, hop_by_hop_headers, spawn_tunnel, strip_hop_by_hop};
use crate::lifecycle::Shutdown;
use crate::net::TransportCache;
use crate::observability::metrics;
use crate::registry::{BackendDescriptor, Registry};
use crate::routing::path::join_path;
use crate::routing::{parse_proxy_path, ProxyPath};

/// Shared state of the connect handler.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    transports: Arc<TransportCache>,
    slots: Arc<Semaphore>,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        transports: Arc<TransportCache>,
        max_in_flight: usize,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            registry,
            transports,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            shutdown,
        }
    }

    /// Dispatch slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Forward `request` to the backend its path selects.
    pub async fn dispatch(&self, mut request: Request<Body>) -> Result<Response, DispatchError> {
        let path = request.uri().path().to_string();
        let target = parse_proxy_path(&path)
            .map_err(|source| DispatchError::InvalidPath { path, source })?;

        let descriptor = self
            .registry
            .lookup(&target.routing_key)
            .ok_or_else(|| DispatchError::UnknownRoute(target.routing_key.clone()))?;

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                // Refuse everything still waiting for a slot.
                self.slots.close();
                return Err(DispatchError::ShuttingDown);
            }
            permit = self.slots.clone().acquire_owned() => {
                permit.map_err(|_| DispatchError::ShuttingDown)?
            }
        };

        let client = self.transport_for(&descriptor)?;
        let location = build_upstream_uri(&descriptor, &target, request.uri().query())?;

        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client_upgrade = hop_by_hop_headers(&mut request);
        let headers = request.headers_mut();
        headers.remove(header::HOST);
        if let Some(ip) = client_ip {
            append_forwarded_for(headers, ip);
        }
        *request.uri_mut() = location;
        *request.version_mut() = Version::HTTP_11;

        tracing::debug!(
            routing_key = %descriptor.routing_key,
            upstream = %request.uri(),
            upgrade = client_upgrade.is_some(),
            "Forwarding request"
        );

        let mut response = client
            .request(request)
            .await
            .map_err(|e| classify_upstream_error(&descriptor.routing_key, &e))?;

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            let accepted = upgrade::upgrade_type(response.headers());
            let Some(client_upgrade) = client_upgrade.filter(|u| {
                accepted
                    .as_ref()
                    .is_some_and(|p| p.as_bytes().eq_ignore_ascii_case(u.protocol.as_bytes()))
            }) else {
                return Err(DispatchError::Unavailable {
                    routing_key: descriptor.routing_key.clone(),
                    message: "backend switched protocols without a matching upgrade request"
                        .to_string(),
                });
            };

            let upstream_upgrade = hyper::upgrade::on(&mut response);
            spawn_tunnel(
                client_upgrade.on_upgrade,
                upstream_upgrade,
                permit,
                &self.shutdown,
                descriptor.routing_key.clone(),
            );
        } else {
            strip_hop_by_hop(response.headers_mut());
        }

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    fn transport_for(
        &self,
        descriptor: &Arc<BackendDescriptor>,
    ) -> Result<crate::net::UpstreamClient, DispatchError> {
        let client = self
            .transports
            .client_for(descriptor)
            .map_err(|source| DispatchError::Transport {
                routing_key: descriptor.routing_key.clone(),
                source,
            })?;
        if self.transports.len() > self.registry.len() {
            self.transports.prune(|key| self.registry.lookup(key).is_some());
        }
        Ok(client)
    }
}

/// Compose `https://<service>.<namespace>.svc:<port>/<base>[/<identifier>]/<remaining>[?query]`.
pub fn build_upstream_uri(
    descriptor: &BackendDescriptor,
    target: &ProxyPath,
    query: Option<&str>,
) -> Result<Uri, DispatchError> {
    let mut components = vec![descriptor.base_path.as_str()];
    if descriptor.use_identifier_segment {
        components.push(target.identifier.as_str());
    }
    components.push(target.remaining.as_str());

    let mut location = format!(
        "https://{}:{}{}",
        descriptor.service_host(),
        descriptor.service_port,
        join_path(components)
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(query);
    }

    location.parse().map_err(|e: axum::http::uri::InvalidUri| {
        DispatchError::InvalidUpstream(format!("{location}: {e}"))
    })
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
        _ => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

fn classify_upstream_error(routing_key: &str, err: &(dyn StdError + 'static)) -> DispatchError {
    let mut messages = Vec::new();
    let mut timed_out = false;
    let mut source = Some(err);
    while let Some(e) = source {
        if e.downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut)
        {
            timed_out = true;
        }
        messages.push(e.to_string());
        source = e.source();
    }

    if timed_out {
        DispatchError::Timeout(routing_key.to_string())
    } else {
        DispatchError::Unavailable {
            routing_key: routing_key.to_string(),
            message: messages.join(": "),
        }
    }
}

/// Connect route handler.
pub async fn connect_handler(
    State(dispatcher): State<Dispatcher>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let request_id = request::request_id(request.headers()).to_string();

    let response = match dispatcher.dispatch(request).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::error!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    error = %e,
                    "Dispatch failed"
                );
            } else {
                tracing::debug!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    error = %e,
                    "Request rejected"
                );
            }
            e.into_response()
        }
    };

    metrics::record_dispatch(method.as_str(), response.status().as_u16(), start);
    response
}

/// Fallback for methods the connect route does not accept.
pub async fn method_not_allowed(method: Method) -> Response {
    DispatchError::MethodNotAllowed(method.to_string()).into_response()
}
