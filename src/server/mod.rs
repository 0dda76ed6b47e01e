//! TCP accept loop
//!
//! Each accepted socket gets a process id, a random secret key and its own
//! tokio task running a [`Session`]. A semaphore bounds the number of live
//! sessions; a cancellation token stops the loop.

pub mod registry;

pub use registry::{BackendKey, CancelRegistry};

use crate::bridge::Engine;
use crate::config::ServerConfig;
use crate::protocol::{encode_backend, sql_state, BackendMessage, ErrorFields};
use crate::session::{Session, SessionContext, TlsConfig};
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// PostgreSQL wire server in front of an [`Engine`]
pub struct Server<E> {
    config: ServerConfig,
    ctx: SessionContext<E>,
    registry: Arc<CancelRegistry>,
    next_pid: AtomicI32,
    shutdown: CancellationToken,
}

impl<E> std::fmt::Debug for Server<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl<E: Engine> Server<E> {
    /// Validate `config`, derive user verifiers and load TLS material
    pub fn new(config: ServerConfig, engine: Arc<E>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(CancelRegistry::new());
        let ctx = SessionContext::new(&config, engine, registry.clone())?;
        Ok(Self {
            config,
            ctx,
            registry,
            next_pid: AtomicI32::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Use in-memory TLS material instead of the configured files
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.ctx = self.ctx.with_tls(tls);
        self
    }

    /// Token that stops the accept loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Registry of live sessions
    pub fn registry(&self) -> Arc<CancelRegistry> {
        self.registry.clone()
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let connections = Arc::new(Semaphore::new(self.config.max_connections));
        let ctx = Arc::new(self.ctx);

        tracing::info!(
            addr = %local_addr,
            auth = %self.config.auth,
            max_connections = self.config.max_connections,
            "listening"
        );

        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };
            crate::metrics::counters::connection_accepted();
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!("set_nodelay failed: {}", e);
            }

            let process_id = self.next_pid.fetch_add(1, Ordering::Relaxed);
            let span = tracing::info_span!("session", pid = process_id, peer = %peer);

            let Ok(permit) = connections.clone().try_acquire_owned() else {
                crate::metrics::counters::connection_rejected();
                tokio::spawn(reject(socket).instrument(span));
                continue;
            };

            let key = BackendKey {
                process_id,
                secret_key: rand::random(),
            };
            let ctx = ctx.clone();
            tokio::spawn(
                async move {
                    tracing::debug!("connection accepted");
                    let state = Session::new(socket, key, ctx).run().await;
                    tracing::debug!(%state, "connection released");
                    drop(permit);
                }
                .instrument(span),
            );
        }

        tracing::info!(addr = %local_addr, "stopped accepting connections");
        Ok(())
    }
}

/// Answer a connection over the limit with FATAL 53300
async fn reject(mut socket: TcpStream) {
    let msg = BackendMessage::ErrorResponse(ErrorFields::fatal(
        sql_state::TOO_MANY_CONNECTIONS,
        "sorry, too many clients already",
    ));
    tracing::warn!("connection limit reached, rejecting client");
    if let Err(e) = socket.write_all(&encode_backend(&msg)).await {
        tracing::debug!("could not send rejection: {}", e);
    }
    let _ = socket.shutdown().await;
}

/// Bind `addr` synchronously, for callers outside a runtime
pub fn bind_std(addr: &str) -> Result<(std::net::TcpListener, SocketAddr)> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{EngineError, RowStream};
    use crate::protocol::{decode_backend, encode_frontend, FrontendMessage};
    use bytes::{Buf, BytesMut};
    use tokio::io::AsyncReadExt;

    struct NoRows;

    impl Engine for NoRows {
        async fn execute(&self, _sql: &str) -> std::result::Result<RowStream, EngineError> {
            Ok(RowStream::command("SET"))
        }
    }

    async fn start(config: ServerConfig) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let server = Server::new(config, Arc::new(NoRows)).unwrap();
        let shutdown = server.shutdown_token();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(server.serve(listener));
        (addr, shutdown, handle)
    }

    async fn first_message(socket: &mut TcpStream) -> BackendMessage {
        let mut buf = BytesMut::new();
        loop {
            if let Some((msg, consumed)) = decode_backend(&buf).unwrap() {
                buf.advance(consumed);
                return msg;
            }
            assert!(socket.read_buf(&mut buf).await.unwrap() > 0);
        }
    }

    fn startup() -> FrontendMessage {
        FrontendMessage::Startup {
            version: crate::protocol::constants::PROTOCOL_VERSION,
            params: vec![("user".into(), "sam".into())],
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        assert!(Server::new(config, Arc::new(NoRows)).is_err());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = ServerConfig::builder().max_connections(1).build().unwrap();
        let (addr, shutdown, _handle) = start(config).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(&encode_frontend(&startup())).await.unwrap();
        assert_eq!(
            first_message(&mut first).await,
            BackendMessage::Authentication(crate::protocol::AuthenticationMessage::Ok)
        );

        let mut second = TcpStream::connect(addr).await.unwrap();
        match first_message(&mut second).await {
            BackendMessage::ErrorResponse(fields) => {
                assert_eq!(fields.code.as_deref(), Some(sql_state::TOO_MANY_CONNECTIONS));
                assert!(fields.is_fatal());
            }
            other => panic!("expected ErrorResponse, got {:?}", other),
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let (_addr, shutdown, handle) = start(ServerConfig::default()).await;
        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[test]
    fn test_bind_std_reports_port() {
        let (_listener, addr) = bind_std("127.0.0.1:0").unwrap();
        assert_ne!(addr.port(), 0);
    }
}
