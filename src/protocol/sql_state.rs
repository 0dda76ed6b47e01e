//! SQLSTATE codes reported in error responses

/// Connection exception
pub const CONNECTION_EXCEPTION: &str = "08000";

/// Protocol violation
pub const PROTOCOL_VIOLATION: &str = "08P01";

/// Feature not supported
pub const FEATURE_NOT_SUPPORTED: &str = "0A000";

/// Data exception
pub const DATA_EXCEPTION: &str = "22000";

/// Invalid authorization specification
pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";

/// Invalid password
pub const INVALID_PASSWORD: &str = "28P01";

/// Syntax error
pub const SYNTAX_ERROR: &str = "42601";

/// Undefined column
pub const UNDEFINED_COLUMN: &str = "42703";

/// Undefined function
pub const UNDEFINED_FUNCTION: &str = "42883";

/// Too many connections
pub const TOO_MANY_CONNECTIONS: &str = "53300";

/// Program limit exceeded
pub const PROGRAM_LIMIT_EXCEEDED: &str = "54000";

/// Statement too complex
pub const STATEMENT_TOO_COMPLEX: &str = "54001";

/// Too many columns
pub const TOO_MANY_COLUMNS: &str = "54011";

/// Query canceled
pub const QUERY_CANCELED: &str = "57014";

/// Admin shutdown
pub const ADMIN_SHUTDOWN: &str = "57P01";

/// Internal error
pub const INTERNAL_ERROR: &str = "XX000";

/// Error severities
pub mod severity {
    /// Session-ending error
    pub const FATAL: &str = "FATAL";

    /// Statement-level error
    pub const ERROR: &str = "ERROR";

    /// Warning notice
    pub const WARNING: &str = "WARNING";

    /// Informational notice
    pub const NOTICE: &str = "NOTICE";
}
