//! TLS negotiation over real sockets
//!
//! Certificates are generated per test with rcgen; the client side is a
//! rustls connector trusting exactly that certificate.

mod common;

use common::{column, connect, RawClient};
use duckdb_pgwire::protocol::{BackendMessage, FrontendMessage};
use duckdb_pgwire::{Server, ServerConfig, TlsConfig};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

struct Certificate {
    cert_pem: String,
    key_pem: String,
    der: rustls::pki_types::CertificateDer<'static>,
}

fn certificate() -> Certificate {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    Certificate {
        cert_pem: generated.cert.pem(),
        key_pem: generated.key_pair.serialize_pem(),
        der: generated.cert.der().clone(),
    }
}

fn connector(cert: &Certificate) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(cert.der.clone()).unwrap();
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// SSLRequest, expect `S`, then run the client handshake
async fn upgrade(addr: std::net::SocketAddr, cert: &Certificate) -> RawClient<TlsStream<TcpStream>> {
    let mut raw = RawClient::new(TcpStream::connect(addr).await.unwrap());
    raw.send(FrontendMessage::SslRequest).await;
    assert_eq!(raw.recv_byte().await, b'S');

    let server_name = ServerName::try_from("localhost").unwrap();
    let tls = connector(cert)
        .connect(server_name, raw.into_inner())
        .await
        .expect("handshake");
    RawClient::new(tls)
}

#[tokio::test]
async fn test_ssl_request_declined_without_certificate() {
    let server = common::start(ServerConfig::default()).await;
    let mut raw = RawClient::new(TcpStream::connect(server.addr).await.unwrap());
    raw.send(FrontendMessage::SslRequest).await;
    assert_eq!(raw.recv_byte().await, b'N');

    let greeting = raw.startup("sam").await;
    assert_eq!(greeting.last(), Some(&BackendMessage::ready_for_query()));
}

#[tokio::test]
async fn test_query_over_tls() {
    let cert = certificate();
    let tls = TlsConfig::from_pem(cert.cert_pem.as_bytes(), cert.key_pem.as_bytes()).unwrap();
    let server = Server::new(ServerConfig::default(), common::catalog())
        .unwrap()
        .with_tls(tls);
    let server = common::start_server(server).await;

    let mut raw = upgrade(server.addr, &cert).await;
    let version = raw.stream.get_ref().1.protocol_version();
    assert!(version.is_some());

    let greeting = raw.startup("sam").await;
    assert_eq!(greeting.last(), Some(&BackendMessage::ready_for_query()));

    raw.send(FrontendMessage::Query("SELECT duckdb_pgwire('Sam')".into()))
        .await;
    let reply = raw.recv_until_ready().await;
    let BackendMessage::DataRow(values) = &reply[1] else {
        panic!("expected DataRow, got {:?}", reply[1]);
    };
    assert_eq!(values[0].as_deref(), Some("DuckdbPgwire Sam 🐥".as_bytes()));
    assert_eq!(reply[2], BackendMessage::CommandComplete("SELECT 1".into()));
}

#[tokio::test]
async fn test_certificate_files_from_config() {
    let cert = certificate();
    let mut cert_file = tempfile::NamedTempFile::new().unwrap();
    cert_file.write_all(cert.cert_pem.as_bytes()).unwrap();
    let mut key_file = tempfile::NamedTempFile::new().unwrap();
    key_file.write_all(cert.key_pem.as_bytes()).unwrap();

    let config = ServerConfig::builder()
        .tls(cert_file.path(), key_file.path())
        .build()
        .unwrap();
    let server = common::start(config).await;

    let mut raw = upgrade(server.addr, &cert).await;
    let greeting = raw.startup("sam").await;
    assert!(greeting
        .iter()
        .any(|m| matches!(m, BackendMessage::BackendKeyData { .. })));

    // Plain clients can still connect when they don't ask for TLS
    let client = connect(server.addr, "sam", None).await.unwrap();
    assert_eq!(column(&client, "SELECT 1").await, vec![Some("1".to_string())]);
}

#[tokio::test]
async fn test_second_ssl_request_is_fatal() {
    let cert = certificate();
    let tls = TlsConfig::from_pem(cert.cert_pem.as_bytes(), cert.key_pem.as_bytes()).unwrap();
    let server = Server::new(ServerConfig::default(), common::catalog())
        .unwrap()
        .with_tls(tls);
    let server = common::start_server(server).await;

    let mut raw = upgrade(server.addr, &cert).await;
    raw.send(FrontendMessage::SslRequest).await;
    let reply = raw.recv_until_ready().await;
    assert_eq!(
        common::error_code(&reply[0]),
        Some(duckdb_pgwire::protocol::sql_state::PROTOCOL_VIOLATION)
    );
}
