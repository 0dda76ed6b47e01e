//! Error types

use crate::bridge::EngineError;
use crate::extension::RegistrationError;
use crate::protocol::{sql_state, ProtocolError};
use std::io;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the client socket
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Framing or sequencing error on the wire
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Query rejected or aborted by the engine
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// TLS setup or handshake failure
    #[error("tls error: {0}")]
    Tls(String),

    /// Extension registration failure
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid session state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Whether the error ends the session.
    ///
    /// Only engine errors are reported to the client with the session kept
    /// open; everything else tears the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Engine(_))
    }

    /// Short label used in logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Protocol(_) => "protocol",
            Error::Authentication(_) => "authentication",
            Error::Engine(_) => "engine",
            Error::Tls(_) => "tls",
            Error::Registration(_) => "registration",
            Error::Config(_) => "config",
            Error::InvalidState { .. } => "invalid_state",
            Error::ConnectionClosed => "connection_closed",
        }
    }

    /// Message text for the ErrorResponse `M` field
    pub fn client_message(&self) -> String {
        match self {
            Error::Authentication(msg) | Error::Tls(msg) | Error::Config(msg) => msg.clone(),
            Error::Protocol(err) => err.to_string(),
            Error::Engine(err) => err.message().to_string(),
            Error::Registration(err) => err.to_string(),
            other => other.to_string(),
        }
    }

    /// SQLSTATE reported to the client for this error
    pub fn sql_state(&self) -> &str {
        match self {
            Error::Protocol(ProtocolError::FrameTooLarge { .. }) => {
                sql_state::PROGRAM_LIMIT_EXCEEDED
            }
            Error::Protocol(_) => sql_state::PROTOCOL_VIOLATION,
            Error::Authentication(_) => sql_state::INVALID_PASSWORD,
            Error::Engine(err) => err.code(),
            Error::Io(_) | Error::Tls(_) | Error::ConnectionClosed => {
                sql_state::CONNECTION_EXCEPTION
            }
            Error::Registration(_) | Error::Config(_) | Error::InvalidState { .. } => {
                sql_state::INTERNAL_ERROR
            }
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_are_recoverable() {
        let err = Error::from(EngineError::syntax("syntax error at or near \"SELEC\""));
        assert!(!err.is_fatal());
        assert_eq!(err.category(), "engine");
        assert_eq!(err.sql_state(), sql_state::SYNTAX_ERROR);
    }

    #[test]
    fn test_framing_errors_are_fatal() {
        let err = Error::from(ProtocolError::InvalidLength(-1));
        assert!(err.is_fatal());
        assert_eq!(err.sql_state(), sql_state::PROTOCOL_VIOLATION);

        let err = Error::from(ProtocolError::FrameTooLarge { len: 10, max: 5 });
        assert_eq!(err.sql_state(), sql_state::PROGRAM_LIMIT_EXCEEDED);
    }

    #[test]
    fn test_io_error_conversion() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_fatal());
        assert_eq!(err.category(), "io");
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::InvalidState {
            expected: "idle".into(),
            actual: "executing".into(),
        };
        assert_eq!(err.to_string(), "invalid state: expected idle, got executing");
    }
}
