//! Client transport (plain or TLS-upgraded)

use crate::{Error, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Accepted client stream, before or after the SSLRequest upgrade.
///
/// Generic over the underlying stream so sessions run on TCP sockets in
/// production and on in-memory duplex pipes in tests.
pub enum Transport<S> {
    /// Unencrypted stream
    Plain(S),
    /// TLS-encrypted stream
    Tls(Box<TlsStream<S>>),
}

impl<S> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain"),
            Transport::Tls(_) => f.write_str("Transport::Tls"),
        }
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Write all bytes to the stream
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            Transport::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the stream
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read into buffer; `Ok(0)` means the peer closed the stream
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    /// Whether the stream is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Negotiated TLS protocol version (e.g. `TLSv1_3`)
    pub fn tls_version(&self) -> Option<String> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(stream) => {
                let (_, conn) = stream.get_ref();
                conn.protocol_version().map(|v| format!("{:?}", v))
            }
        }
    }

    /// Run the server side of the TLS handshake.
    ///
    /// Consumes `self` and returns a new `Transport` with a TLS-encrypted stream.
    /// Returns an error if the transport is already encrypted.
    pub async fn upgrade_to_tls(self, acceptor: &TlsAcceptor) -> Result<Self> {
        match self {
            Transport::Plain(stream) => {
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;
                Ok(Transport::Tls(Box::new(tls_stream)))
            }
            Transport::Tls(_) => Err(Error::Tls("transport is already TLS-encrypted".into())),
        }
    }
}
