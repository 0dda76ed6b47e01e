//! Protocol message types

use super::sql_state::severity;
use bytes::Bytes;

/// Message received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// StartupMessage opening a session
    Startup {
        /// Requested protocol version (major << 16 | minor)
        version: i32,
        /// `user`, `database`, `application_name` and other startup options
        params: Vec<(String, String)>,
    },

    /// SSLRequest, answered with a single `S` or `N` byte
    SslRequest,

    /// GSSENCRequest message (GSSAPI encryption negotiation)
    GssEncRequest,

    /// CancelRequest, sent on a fresh connection instead of a startup message
    CancelRequest {
        /// Process ID of the target session
        process_id: i32,
        /// Secret key of the target session
        secret_key: i32,
    },

    /// Cleartext password answering AuthenticationCleartextPassword
    Password(String),

    /// SASLInitialResponse carrying the chosen mechanism
    SaslInitialResponse {
        /// Mechanism picked from the advertised list
        mechanism: String,
        /// client-first-message
        data: Vec<u8>,
    },

    /// SASLResponse
    SaslResponse {
        /// client-final-message
        data: Vec<u8>,
    },

    /// Simple query text
    Query(String),

    /// Sync (extended query protocol)
    Sync,

    /// Flush (extended query protocol)
    Flush,

    /// Client is closing the connection
    Terminate,

    /// Tagged message the server recognises by tag only
    /// (Parse, Bind, Describe, Execute, Close, CopyFail, FunctionCall)
    Unsupported {
        /// Message tag
        tag: u8,
        /// Raw payload (without tag and length)
        body: Bytes,
    },
}

impl FrontendMessage {
    /// Decode phase in which this message is read off the wire.
    ///
    /// The untagged startup family and the overloaded `p` message can only be
    /// told apart by knowing where in the conversation the peer is.
    pub fn phase(&self) -> FrontendPhase {
        match self {
            Self::Startup { .. }
            | Self::SslRequest
            | Self::GssEncRequest
            | Self::CancelRequest { .. } => FrontendPhase::Startup,
            Self::Password(_) => FrontendPhase::Password,
            Self::SaslInitialResponse { .. } => FrontendPhase::SaslInitial,
            Self::SaslResponse { .. } => FrontendPhase::SaslResponse,
            _ => FrontendPhase::Ready,
        }
    }

    /// Short name used in logs and protocol-violation messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "StartupMessage",
            Self::SslRequest => "SSLRequest",
            Self::GssEncRequest => "GSSENCRequest",
            Self::CancelRequest { .. } => "CancelRequest",
            Self::Password(_) => "PasswordMessage",
            Self::SaslInitialResponse { .. } => "SASLInitialResponse",
            Self::SaslResponse { .. } => "SASLResponse",
            Self::Query(_) => "Query",
            Self::Sync => "Sync",
            Self::Flush => "Flush",
            Self::Terminate => "Terminate",
            Self::Unsupported { tag, .. } => unsupported_name(*tag),
        }
    }

    /// Look up a startup parameter by name
    pub fn startup_param(&self, name: &str) -> Option<&str> {
        match self {
            Self::Startup { params, .. } => params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

fn unsupported_name(tag: u8) -> &'static str {
    use super::constants::frontend_tags::*;
    match tag {
        PARSE => "Parse",
        BIND => "Bind",
        DESCRIBE => "Describe",
        EXECUTE => "Execute",
        CLOSE => "Close",
        COPY_FAIL => "CopyFail",
        FUNCTION_CALL => "FunctionCall",
        _ => "Unknown",
    }
}

/// Where the server is in the conversation, which decides how untagged and
/// `p`-tagged frontend messages are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendPhase {
    /// Untagged startup packets (StartupMessage, SSLRequest, GSSENCRequest, CancelRequest)
    Startup,
    /// `p` carries a cleartext password
    Password,
    /// `p` carries a SASLInitialResponse
    SaslInitial,
    /// `p` carries a SASLResponse
    SaslResponse,
    /// Regular tagged messages after authentication
    Ready,
}

/// Message sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Authentication request or outcome
    Authentication(AuthenticationMessage),

    /// Key a client quotes in a later CancelRequest
    BackendKeyData {
        /// Session process id
        process_id: i32,
        /// Random per-session secret
        secret_key: i32,
    },

    /// CommandComplete with its tag (e.g. `SELECT 3`)
    CommandComplete(String),

    /// One row in text format; `None` is SQL NULL
    DataRow(Vec<Option<Bytes>>),

    /// Response to an empty query string
    EmptyQueryResponse,

    /// ErrorResponse
    ErrorResponse(ErrorFields),

    /// NoticeResponse
    NoticeResponse(ErrorFields),

    /// ParameterStatus reported after authentication
    ParameterStatus {
        /// Setting name
        name: String,
        /// Current value
        value: String,
    },

    /// ReadyForQuery
    ReadyForQuery {
        /// `I` idle, `T` in transaction, `E` failed transaction
        status: u8,
    },

    /// Column layout of the rows that follow
    RowDescription(Vec<FieldDescription>),
}

impl BackendMessage {
    /// ReadyForQuery with idle transaction status
    pub fn ready_for_query() -> Self {
        Self::ReadyForQuery {
            status: super::constants::tx_status::IDLE,
        }
    }
}

/// Authentication subtypes the server sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Ask for a cleartext password
    CleartextPassword,

    /// Advertise SASL mechanisms
    Sasl {
        /// Mechanism names, in preference order
        mechanisms: Vec<String>,
    },

    /// server-first-message
    SaslContinue {
        /// Challenge bytes
        data: Vec<u8>,
    },

    /// server-final-message carrying the server signature
    SaslFinal {
        /// Verifier bytes
        data: Vec<u8>,
    },
}

/// One RowDescription entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Source table OID, 0 for computed columns
    pub table_oid: i32,
    /// Source attribute number, 0 for computed columns
    pub column_attr: i16,
    /// Type OID
    pub type_oid: u32,
    /// `typlen`; negative for variable width
    pub type_size: i16,
    /// `atttypmod`, -1 when not applicable
    pub type_modifier: i32,
    /// Always 0 (text)
    pub format_code: i16,
}

/// Fields of an ErrorResponse or NoticeResponse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// `S` and `V`: ERROR, FATAL, NOTICE...
    pub severity: Option<String>,
    /// `C`: five-character SQLSTATE
    pub code: Option<String>,
    /// `M`: primary message
    pub message: Option<String>,
    /// `D`: optional detail
    pub detail: Option<String>,
    /// `H`: optional hint
    pub hint: Option<String>,
    /// `P`: 1-based cursor position in the query
    pub position: Option<String>,
}

impl ErrorFields {
    /// Build fields with severity, SQLSTATE and message
    pub fn new(severity: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Some(severity.to_string()),
            code: Some(code.to_string()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Statement-level error; the session continues
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(severity::ERROR, code, message)
    }

    /// Session-ending error
    pub fn fatal(code: &str, message: impl Into<String>) -> Self {
        Self::new(severity::FATAL, code, message)
    }

    /// Attach a detail line
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach a hint line
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether the severity ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_deref(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref msg) = self.message {
            write!(f, "{}", msg)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}
