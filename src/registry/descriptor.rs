//! Backend descriptor types.

use std::fmt;

/// Client certificate, private key and trust anchors (PEM bytes) used to
/// establish a mutual-TLS identity toward one backend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub trust_anchors: Vec<u8>,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("certificate", &format_args!("<{} bytes>", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .field("trust_anchors", &format_args!("<{} bytes>", self.trust_anchors.len()))
            .finish()
    }
}

/// A resolved, ready-to-use route to one backend service.
///
/// Equality is structural over every field; the registry relies on it to
/// collapse redundant reconciliation passes into no-op writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// `<namespace>/<name>` of the ConfigMap that produced this descriptor.
    pub source_identity: String,
    /// Registry key, matched against the routing-key path segment.
    pub routing_key: String,
    pub service_name: String,
    pub service_namespace: String,
    pub service_port: String,
    /// Prefix prepended to forwarded paths, without surrounding slashes.
    pub base_path: String,
    /// Splice the request's identifier segment after the base path.
    pub use_identifier_segment: bool,
    pub credentials: CredentialBundle,
}

impl BackendDescriptor {
    /// Cluster-local DNS name of the backend service.
    pub fn service_host(&self) -> String {
        format!("{}.{}.svc", self.service_name, self.service_namespace)
    }
}
