//! Query bridge between the wire session and the embedded engine
//!
//! The engine is consumed through the narrow [`Engine`] contract: SQL text in,
//! a lazy [`RowStream`] (or an [`EngineError`]) out. Row values are turned into
//! PostgreSQL text format by [`text`].

mod stream;
pub mod text;
mod types;

pub use stream::{Row, RowStream, MAX_COLUMNS};
pub use types::{Column, DataType, Value};

use crate::protocol::sql_state;
use std::future::Future;
use thiserror::Error;

/// Execution contract of the embedded query engine.
///
/// The handle is shared by every session, so implementations must be safe to
/// call concurrently.
pub trait Engine: Send + Sync + 'static {
    /// Run one SQL statement.
    fn execute(&self, sql: &str) -> impl Future<Output = Result<RowStream, EngineError>> + Send;
}

/// Error raised by the engine while planning or running a query.
///
/// The message is passed to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    code: String,
    message: String,
    detail: Option<String>,
}

impl EngineError {
    /// Error with an explicit SQLSTATE
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Syntax error (42601)
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(sql_state::SYNTAX_ERROR, message)
    }

    /// Unknown function (42883)
    pub fn undefined_function(message: impl Into<String>) -> Self {
        Self::new(sql_state::UNDEFINED_FUNCTION, message)
    }

    /// Data exception (22000)
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(sql_state::DATA_EXCEPTION, message)
    }

    /// Unsupported statement or feature (0A000)
    pub fn feature_not_supported(message: impl Into<String>) -> Self {
        Self::new(sql_state::FEATURE_NOT_SUPPORTED, message)
    }

    /// Expression nested too deeply (54001)
    pub fn statement_too_complex() -> Self {
        Self::new(sql_state::STATEMENT_TOO_COMPLEX, "stack depth limit exceeded")
    }

    /// Row wider than a RowDescription can describe (54011)
    pub fn too_many_columns(count: usize) -> Self {
        Self::new(
            sql_state::TOO_MANY_COLUMNS,
            format!(
                "result has {} columns; at most {} are supported",
                count,
                stream::MAX_COLUMNS
            ),
        )
    }

    /// Query cancelled on user request (57014)
    pub fn query_canceled() -> Self {
        Self::new(
            sql_state::QUERY_CANCELED,
            "canceling statement due to user request",
        )
    }

    /// Attach a detail line
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// SQLSTATE
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Message text
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Detail line, if any
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Whether this error reports a cancelled query
    pub fn is_canceled(&self) -> bool {
        self.code == sql_state::QUERY_CANCELED
    }
}
