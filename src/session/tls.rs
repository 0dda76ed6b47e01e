//! TLS negotiation for incoming connections
//!
//! A client opens with an SSLRequest; the server answers a single byte,
//! `S` to run a TLS handshake or `N` to continue unencrypted on the same
//! socket. Certificate material is supplied by the host as PEM files.

use super::transport::Transport;
use crate::protocol::constants::ssl_response;
use crate::protocol::ProtocolError;
use crate::{Error, Result};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

/// Name and version of the linked TLS library
pub const TLS_LIBRARY: &str = "rustls 0.23";

/// Name of the cryptography provider rustls is built with
pub const CRYPTO_PROVIDER: &str = "aws-lc-rs";

/// Linked TLS library, as reported by the diagnostic SQL function
pub fn linked_library() -> String {
    format!("{} ({})", TLS_LIBRARY, CRYPTO_PROVIDER)
}

/// Result of answering an SSLRequest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsOutcome {
    /// Handshake completed with the given protocol version (e.g. `TLSv1_3`)
    Established {
        /// Negotiated protocol version
        version: String,
    },
    /// Server answered `N`; the client may continue unencrypted
    Declined,
}

/// Server-side TLS configuration.
///
/// # Examples
///
/// ```ignore
/// let tls = TlsConfig::builder()
///     .cert_path("/etc/pgwire/server.crt")
///     .key_path("/etc/pgwire/server.key")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    cert_path: Option<PathBuf>,
    server_config: Arc<ServerConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Build from in-memory PEM data
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = parse_certs(cert_pem, "certificate data")?;
        let key = parse_key(key_pem, "key data")?;
        Ok(Self {
            cert_path: None,
            server_config: server_config(certs, key)?,
        })
    }

    /// Acceptor running the server side of the handshake
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }

    /// Get the rustls ServerConfig for this TLS configuration.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert_path", &self.cert_path)
            .field("server_config", &"<ServerConfig>")
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

impl TlsConfigBuilder {
    /// Set the path to the PEM certificate chain (leaf first)
    pub fn cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    /// Set the path to the PEM private key
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - either path is missing or unreadable
    /// - the files contain no certificate or no private key
    /// - rustls rejects the certificate/key pair
    pub fn build(self) -> Result<TlsConfig> {
        let cert_path = self
            .cert_path
            .ok_or_else(|| Error::Config("TLS requires a certificate path".into()))?;
        let key_path = self
            .key_path
            .ok_or_else(|| Error::Config("TLS requires a private key path".into()))?;

        let certs = parse_certs(&read_file(&cert_path)?, &cert_path.display().to_string())?;
        let key = parse_key(&read_file(&key_path)?, &key_path.display().to_string())?;

        Ok(TlsConfig {
            server_config: server_config(certs, key)?,
            cert_path: Some(cert_path),
        })
    }
}

/// Reject an SSLRequest that arrives where no upgrade is possible.
///
/// `pipelined` is the number of bytes the client sent after the SSLRequest
/// before seeing the answer; any such bytes would bypass encryption.
pub fn check_request<S>(transport: &Transport<S>, pipelined: usize) -> Result<()> {
    if matches!(transport, Transport::Tls(_)) {
        return Err(ProtocolError::Violation(
            "SSLRequest received on an encrypted connection".into(),
        )
        .into());
    }
    if pipelined > 0 {
        return Err(ProtocolError::Violation(format!(
            "received {} unencrypted bytes after SSLRequest",
            pipelined
        ))
        .into());
    }
    Ok(())
}

/// Answer an SSLRequest with `S` and a handshake, or with `N`
pub async fn negotiate<S>(
    mut transport: Transport<S>,
    tls: Option<&TlsConfig>,
    pipelined: usize,
) -> Result<(Transport<S>, TlsOutcome)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    check_request(&transport, pipelined)?;

    let Some(tls) = tls else {
        transport.write_all(&[ssl_response::DECLINE]).await?;
        transport.flush().await?;
        crate::metrics::counters::tls_negotiated(false);
        tracing::debug!("declined SSLRequest, continuing unencrypted");
        return Ok((transport, TlsOutcome::Declined));
    };

    transport.write_all(&[ssl_response::ACCEPT]).await?;
    transport.flush().await?;

    let transport = transport.upgrade_to_tls(&tls.acceptor()).await?;
    let version = transport
        .tls_version()
        .unwrap_or_else(|| "unknown".to_string());
    crate::metrics::counters::tls_negotiated(true);
    tracing::info!(tls_version = %version, "TLS connection established");

    Ok((transport, TlsOutcome::Established { version }))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("failed to read '{}': {}", path.display(), e)))
}

fn parse_certs(pem: &[u8], source: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::Cursor::new(pem);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates from {}: {}", source, e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no valid certificates found in {}",
            source
        )));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8], source: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::Cursor::new(pem);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Config(format!("failed to parse private key from {}: {}", source, e)))?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", source)))
}

fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("unsupported TLS protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("invalid certificate or key: {}", e)))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn self_signed() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    #[test]
    fn test_linked_library_names_rustls() {
        assert!(linked_library().starts_with("rustls "));
    }

    #[test]
    fn test_from_pem() {
        let (cert, key) = self_signed();
        let tls = TlsConfig::from_pem(cert.as_bytes(), key.as_bytes()).unwrap();
        assert!(format!("{:?}", tls).contains("TlsConfig"));
    }

    #[test]
    fn test_from_pem_without_key() {
        let (cert, _) = self_signed();
        let result = TlsConfig::from_pem(cert.as_bytes(), cert.as_bytes());
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("no private key")));
    }

    #[test]
    fn test_builder_requires_paths() {
        assert!(TlsConfig::builder().build().is_err());
        assert!(TlsConfig::builder().cert_path("/nonexistent").build().is_err());
    }

    #[test]
    fn test_builder_from_files() {
        let (cert, key) = self_signed();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, cert).unwrap();
        std::fs::write(&key_path, key).unwrap();

        let tls = TlsConfig::builder()
            .cert_path(&cert_path)
            .key_path(&key_path)
            .build()
            .unwrap();
        assert_eq!(tls.cert_path.as_deref(), Some(cert_path.as_path()));
    }

    #[tokio::test]
    async fn test_decline_writes_n_and_keeps_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut transport, outcome) = negotiate(Transport::Plain(server), None, 0).await.unwrap();
        assert_eq!(outcome, TlsOutcome::Declined);

        let mut buf = BytesMut::new();
        tokio::io::AsyncReadExt::read_buf(&mut client, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf[..], b"N");

        // Same stream is still usable
        tokio::io::AsyncWriteExt::write_all(&mut client, b"ok")
            .await
            .unwrap();
        let mut buf = BytesMut::new();
        transport.read_buf(&mut buf).await.unwrap();
        assert_eq!(&buf[..], b"ok");
    }

    #[tokio::test]
    async fn test_pipelined_bytes_rejected() {
        let (_client, server) = tokio::io::duplex(64);
        let result = negotiate(Transport::Plain(server), None, 3).await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::Violation(_)))
        ));
    }
}
