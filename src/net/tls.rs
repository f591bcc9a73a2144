//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the listener's serving certificate for axum-server
//! - Build per-backend mutual-TLS client configurations from PEM bundles
//!
//! # Design Decisions
//! - Backends are trusted only through the bundle's own trust anchors
//! - An empty bundle part is an error, not a silent fallback to no auth

use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::registry::CredentialBundle;

/// Errors building a TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{0} is empty")]
    Missing(&'static str),

    #[error("failed to parse {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable certificate in {0}")]
    NoCertificates(&'static str),

    #[error("no private key found")]
    NoPrivateKey,

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<RustlsConfig, std::io::Error> {
    for (what, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} file not found: {:?}", what, path),
            ));
        }
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

fn parse_certs(pem: &[u8], what: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    if pem.is_empty() {
        return Err(TlsError::Missing(what));
    }
    let mut reader = std::io::BufReader::new(Cursor::new(pem));
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem { what, source })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(what));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    if pem.is_empty() {
        return Err(TlsError::Missing("private key"));
    }
    let mut reader = std::io::BufReader::new(Cursor::new(pem));
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Pem {
            what: "private key",
            source,
        })?
        .ok_or(TlsError::NoPrivateKey)
}

/// Build a client configuration presenting the bundle's certificate and
/// trusting only the bundle's anchors.
pub fn build_client_config(bundle: &CredentialBundle) -> Result<ClientConfig, TlsError> {
    let mut roots = RootCertStore::empty();
    let anchors = parse_certs(&bundle.trust_anchors, "trust anchors")?;
    let (added, ignored) = roots.add_parsable_certificates(anchors);
    if added == 0 {
        return Err(TlsError::NoCertificates("trust anchors"));
    }
    if ignored > 0 {
        tracing::warn!(ignored, "Ignored unparsable trust anchors");
    }

    let cert_chain = parse_certs(&bundle.certificate, "client certificate")?;
    let private_key = parse_key(&bundle.private_key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, private_key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
