//! duckdb-pgwire: a PostgreSQL wire-protocol front-end for an embedded engine
//!
//! This crate handles:
//! * PostgreSQL v3 framing in both directions ([`protocol`])
//! * Per-connection sessions with optional TLS and password/SCRAM
//!   authentication ([`session`], [`auth`])
//! * Streaming engine results back as DataRows ([`bridge`])
//! * Registering the extension's functions with a host engine ([`extension`])
//!
//! The engine is consumed only through [`Engine::execute`]; the host only
//! through [`ExtensionHost`]. [`catalog::Catalog`] implements both for tests
//! and for the standalone binary.

pub mod auth;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extension;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod session;

pub use bridge::{Column, DataType, Engine, EngineError, Row, RowStream, Value};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use extension::{Extension, ExtensionHost, RegistrationError, RegistrationReport};
pub use server::Server;
pub use session::{Session, SessionState, TlsConfig};
