//! Shared helpers for integration tests

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use duckdb_pgwire::catalog::Catalog;
use duckdb_pgwire::protocol::constants::PROTOCOL_VERSION;
use duckdb_pgwire::protocol::{decode_backend, encode_frontend, BackendMessage, FrontendMessage};
use duckdb_pgwire::{Extension, Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Running test server; stops accepting when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Catalog with the extension's functions registered
pub fn catalog() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::new());
    Extension::new(ServerConfig::default())
        .register(&catalog)
        .expect("registration should succeed");
    catalog
}

/// Start a server on an ephemeral port
pub async fn start(config: ServerConfig) -> TestServer {
    start_server(Server::new(config, catalog()).expect("valid config")).await
}

/// Start an already-built server on an ephemeral port
pub async fn start_server(server: Server<Catalog>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    tokio::spawn(server.serve(listener));
    TestServer { addr, shutdown }
}

/// tokio-postgres connection string for `user`/`password`
pub fn conn_str(addr: SocketAddr, user: &str, password: Option<&str>) -> String {
    let mut s = format!(
        "host={} port={} user={} dbname=memory sslmode=disable",
        addr.ip(),
        addr.port(),
        user
    );
    if let Some(password) = password {
        s.push_str(&format!(" password={}", password));
    }
    s
}

/// Connect with tokio-postgres and drive the connection in the background
pub async fn connect(
    addr: SocketAddr,
    user: &str,
    password: Option<&str>,
) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let (client, connection) =
        tokio_postgres::connect(&conn_str(addr, user, password), tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

/// First column of every row returned by a simple query
pub async fn column(client: &tokio_postgres::Client, sql: &str) -> Vec<Option<String>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            tokio_postgres::SimpleQueryMessage::Row(row) => Some(row.get(0).map(str::to_string)),
            _ => None,
        })
        .collect()
}

/// Minimal client speaking the crate's own codec
pub struct RawClient<S> {
    pub stream: S,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RawClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, msg: FrontendMessage) {
        self.stream.write_all(&encode_frontend(&msg)).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn startup(&mut self, user: &str) -> Vec<BackendMessage> {
        self.send(FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: vec![("user".to_string(), user.to_string())],
        })
        .await;
        self.recv_until_ready().await
    }

    /// Single byte answer to SSLRequest / GSSENCRequest
    pub async fn recv_byte(&mut self) -> u8 {
        assert!(self.buf.is_empty());
        self.stream.read_u8().await.unwrap()
    }

    /// Next message, or `None` once the server closed the connection
    pub async fn recv(&mut self) -> Option<BackendMessage> {
        loop {
            if let Some((msg, consumed)) = decode_backend(&self.buf).unwrap() {
                self.buf.advance(consumed);
                return Some(msg);
            }
            if self.stream.read_buf(&mut self.buf).await.unwrap_or(0) == 0 {
                return None;
            }
        }
    }

    pub async fn recv_until_ready(&mut self) -> Vec<BackendMessage> {
        let mut out = Vec::new();
        while let Some(msg) = self.recv().await {
            let done = matches!(msg, BackendMessage::ReadyForQuery { .. });
            out.push(msg);
            if done {
                break;
            }
        }
        out
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// SQLSTATE of an ErrorResponse
pub fn error_code(msg: &BackendMessage) -> Option<&str> {
    match msg {
        BackendMessage::ErrorResponse(fields) => fields.code.as_deref(),
        _ => None,
    }
}
