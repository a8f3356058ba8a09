use std::{io::BufReader, sync::Arc};

use thiserror::Error;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use crate::{config::TlsOptions, errors::ConfigError};

// -----------------------------------------------------------------------------
// ----- TlsError --------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid TLS server name {0:?}")]
    ServerName(String),

    #[error("connection is gone")]
    Closed,
}

// -----------------------------------------------------------------------------
// ----- TLS: Exported ---------------------------------------------------------

/// Trust anchors parsed from a PEM bundle. Fails when the bundle holds no
/// certificate at all.
pub fn root_store(ca_pem: &[u8]) -> Result<RootCertStore, ConfigError> {
    let mut reader = BufReader::new(ca_pem);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::InvalidCa(format!("failed to read CA bundle: {e}")))?;

    if certs.is_empty() {
        return Err(ConfigError::InvalidCa(
            "no certificates found in CA bundle".to_string(),
        ));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| ConfigError::InvalidCa(format!("rejected CA certificate: {e}")))?;
    }
    Ok(roots)
}

pub fn connector(opts: &TlsOptions) -> Result<TlsConnector, TlsError> {
    let roots = root_store(&opts.ca_pem)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Name to verify: the configured override, else the host we dialled.
pub fn server_name(opts: &TlsOptions, host: &str) -> Result<ServerName<'static>, TlsError> {
    let name = opts.server_name.as_deref().unwrap_or(host);
    ServerName::try_from(name.to_string()).map_err(|_| TlsError::ServerName(name.to_string()))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
