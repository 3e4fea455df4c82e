//! TLS listener configuration.
//!
//! Any TLS-enabled service needs a server certificate and key in PEM
//! form; supplying a CA bundle additionally turns on mutual TLS with
//! required-and-verified client certificates. TLS 1.2 is the floor.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use x509_parser::prelude::FromDer;

use crate::config::ServiceConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("no certificates found in {0}")]
    NoCerts(PathBuf),
    #[error("no private key found in {0}")]
    NoKey(PathBuf),
    #[error("cannot build client verifier: {0}")]
    Verifier(String),
    #[error("tls configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// Acceptor for a TLS-enabled service entry, or `None` when the entry
/// has no certificate configured.
pub fn acceptor_for(service: &ServiceConfig) -> Result<Option<TlsAcceptor>, TlsError> {
    match (&service.certpath, &service.keypath) {
        (Some(cert), Some(key)) => {
            let config = server_config(cert, key, service.cacertpath.as_deref())?;
            Ok(Some(TlsAcceptor::from(Arc::new(config))))
        }
        _ => Ok(None),
    }
}

pub fn server_config(
    cert_path: &Path,
    key_path: &Path,
    cacert_path: Option<&Path>,
) -> Result<ServerConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ]);
    let config = match cacert_path {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|err| TlsError::Verifier(err.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    }
    .with_single_cert(certs, key)?;
    Ok(config)
}

/// CommonName of a peer's leaf certificate, recorded into `client_name`.
pub fn peer_common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert.as_ref()).ok()?;
    let name = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);
    name
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|err| TlsError::Read {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCerts(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| TlsError::Read {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?
        .ok_or_else(|| TlsError::NoKey(path.to_path_buf()))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|err| TlsError::Read {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}
