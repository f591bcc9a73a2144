//! Per-backend upstream transports.
//!
//! # Responsibilities
//! - Build an HTTPS client bound to one backend's mutual-TLS identity
//! - Reuse clients across requests while the backend's descriptor is unchanged
//! - Resolve service hostnames, honouring static overrides
//!
//! # Design Decisions
//! - Cache is keyed by routing key; a changed descriptor rebuilds the client
//! - Entries for routing keys that left the registry are pruned on rebuild
//! - HTTP/1.1 only, since upgrades ride on HTTP/1.1 connections

use dashmap::DashMap;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

use crate::net::tls::{build_client_config, TlsError};
use crate::registry::BackendDescriptor;

pub type UpstreamClient = Client<HttpsConnector<HttpConnector<ServiceResolver>>, axum::body::Body>;

/// DNS resolver consulting a static host table before the system resolver.
#[derive(Clone)]
pub struct ServiceResolver {
    overrides: Arc<HashMap<String, IpAddr>>,
    system: GaiResolver,
}

impl ServiceResolver {
    pub fn new(overrides: HashMap<String, IpAddr>) -> Self {
        Self {
            overrides: Arc::new(overrides),
            system: GaiResolver::new(),
        }
    }
}

type Addrs = std::vec::IntoIter<SocketAddr>;
type ResolveFuture = Pin<Box<dyn Future<Output = Result<Addrs, io::Error>> + Send>>;

impl Service<Name> for ServiceResolver {
    type Response = Addrs;
    type Error = io::Error;
    type Future = ResolveFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.system.poll_ready(cx)
    }

    fn call(&mut self, name: Name) -> Self::Future {
        if let Some(ip) = self.overrides.get(name.as_str()) {
            // Port 0 is replaced with the URI's port by the connector.
            let addrs = vec![SocketAddr::new(*ip, 0)];
            return Box::pin(async move { Ok(addrs.into_iter()) });
        }
        let lookup = self.system.call(name);
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = lookup.await?.collect();
            Ok(addrs.into_iter())
        })
    }
}

/// Per-routing-key cache of mutual-TLS clients.
pub struct TransportCache {
    entries: DashMap<String, (Arc<BackendDescriptor>, UpstreamClient)>,
    resolver: ServiceResolver,
    connect_timeout: Duration,
}

impl TransportCache {
    pub fn new(resolver: ServiceResolver, connect_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            resolver,
            connect_timeout,
        }
    }

    /// Return a client for `descriptor`, building one if none is cached or
    /// the cached one was built from a different descriptor.
    pub fn client_for(
        &self,
        descriptor: &Arc<BackendDescriptor>,
    ) -> Result<UpstreamClient, TlsError> {
        if let Some(entry) = self.entries.get(&descriptor.routing_key) {
            let (cached, client) = entry.value();
            if Arc::ptr_eq(cached, descriptor) || **cached == **descriptor {
                return Ok(client.clone());
            }
        }

        let client = self.build(descriptor)?;
        tracing::debug!(
            routing_key = %descriptor.routing_key,
            host = %descriptor.service_host(),
            "Built upstream transport"
        );
        self.entries.insert(
            descriptor.routing_key.clone(),
            (descriptor.clone(), client.clone()),
        );
        Ok(client)
    }

    fn build(&self, descriptor: &BackendDescriptor) -> Result<UpstreamClient, TlsError> {
        let tls = build_client_config(&descriptor.credentials)?;

        let mut http = HttpConnector::new_with_resolver(self.resolver.clone());
        http.enforce_http(false);
        http.set_connect_timeout(Some(self.connect_timeout));

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_only()
            .enable_http1()
            .wrap_connector(http);

        Ok(Client::builder(TokioExecutor::new()).build(https))
    }

    /// Drop clients whose routing key is no longer routable.
    pub fn prune(&self, is_live: impl Fn(&str) -> bool) {
        self.entries.retain(|key, _| is_live(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
