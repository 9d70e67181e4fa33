//! TLS client configuration for MLLP-over-TLS receivers.
//!
//! Trust comes either from the bundled WebPKI roots or from a PEM bundle
//! supplied by the operator. The configuration is built once per client so a
//! bad CA file is reported before any document is touched.

use std::{fs::File, io::BufReader, sync::Arc};

use camino::Utf8Path;
use rustls::{ClientConfig, RootCertStore, crypto::ring};
use tokio_rustls::TlsConnector;

use super::TransportError;

/// Build a connector trusting `ca_file`, or the WebPKI roots when absent.
///
/// # Errors
///
/// Returns [`TransportError::TlsConfig`] when the CA file cannot be read,
/// holds no certificates, or the crypto provider rejects the protocol set.
pub fn connector(ca_file: Option<&Utf8Path>) -> Result<TlsConnector, TransportError> {
    let roots = match ca_file {
        Some(path) => roots_from_pem(path)?,
        None => webpki_roots(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::TlsConfig(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

fn webpki_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

fn roots_from_pem(path: &Utf8Path) -> Result<RootCertStore, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::TlsConfig(format!("cannot open CA file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    let mut store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert
            .map_err(|e| TransportError::TlsConfig(format!("cannot parse CA file {path}: {e}")))?;
        store
            .add(cert)
            .map_err(|e| TransportError::TlsConfig(format!("rejected CA certificate: {e}")))?;
    }
    if store.is_empty() {
        return Err(TransportError::TlsConfig(format!(
            "CA file {path} contains no certificates"
        )));
    }
    Ok(store)
}
