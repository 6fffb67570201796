//! TLS connector contract and rustls implementation.

use crate::transport::BoxedIoStream;
use ps_core::RelayError;
use ps_core::RelayResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Which certificate roots the connector trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustStoreMode {
    /// Bundled WebPKI roots only.
    #[default]
    WebPkiOnly,
    /// WebPKI roots plus the operating-system trust store.
    WebPkiAndOs,
}

/// Upgrades a TCP stream to TLS for a secure fetch.
pub trait TlsConnector {
    fn connect(&self, stream: TcpStream, server_name: &str) -> RelayResult<BoxedIoStream>;
}

/// rustls-backed connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsConnector {
    pub trust_store_mode: TrustStoreMode,
}

impl RustlsConnector {
    pub fn with_trust_store_mode(mode: TrustStoreMode) -> Self {
        Self {
            trust_store_mode: mode,
        }
    }
}

#[cfg(feature = "tls-rustls")]
impl TlsConnector for RustlsConnector {
    fn connect(&self, mut stream: TcpStream, server_name: &str) -> RelayResult<BoxedIoStream> {
        use rustls::ClientConfig;
        use rustls::ClientConnection;
        use rustls::StreamOwned;
        use rustls::pki_types::ServerName;

        let roots = root_store(self.trust_store_mode)?;
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = ServerName::try_from(server_name.to_owned()).map_err(|error| {
            RelayError::new(
                "net.tls.server_name_invalid",
                format!("invalid TLS server name `{server_name}`: {error}"),
            )
        })?;

        let mut connection = ClientConnection::new(Arc::new(config), name).map_err(|error| {
            RelayError::new(
                "net.tls.connection_init_failed",
                format!("failed to initialize TLS connection for `{server_name}`: {error}"),
            )
        })?;

        connection.complete_io(&mut stream).map_err(|error| {
            RelayError::new(
                "net.tls.handshake_failed",
                format!("TLS handshake failed for `{server_name}`: {error}"),
            )
        })?;

        Ok(Box::new(StreamOwned::new(connection, stream)))
    }
}

#[cfg(feature = "tls-rustls")]
fn root_store(mode: TrustStoreMode) -> RelayResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if matches!(mode, TrustStoreMode::WebPkiAndOs) {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RelayError::new(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        for cert in native.certs {
            roots.add(cert).map_err(|error| {
                RelayError::new(
                    "net.tls.os_root_add_failed",
                    format!("failed to add operating-system root: {error}"),
                )
            })?;
        }
    }

    if roots.is_empty() {
        return Err(RelayError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
impl TlsConnector for RustlsConnector {
    fn connect(&self, _stream: TcpStream, _server_name: &str) -> RelayResult<BoxedIoStream> {
        Err(RelayError::new(
            "net.tls.backend_unavailable",
            "rustls backend is disabled for this build; enable `ps-net/tls-rustls`",
        ))
    }
}
