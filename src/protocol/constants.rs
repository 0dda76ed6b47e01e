//! Wire-level constants of the PostgreSQL v3 protocol

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// Major protocol version accepted by the server
pub const PROTOCOL_MAJOR: i32 = 3;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// GSSENCRequest code (80877104 = 1234 << 16 | 5680)
pub const GSSENC_REQUEST_CODE: i32 = 0x04D2_1630;

/// CancelRequest code (80877102 = 1234 << 16 | 5678)
pub const CANCEL_REQUEST_CODE: i32 = 0x04D2_162E;

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Any message whose length field exceeds the configured maximum is rejected
/// before allocation.
pub const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Largest startup packet PostgreSQL accepts (`MAX_STARTUP_PACKET_LENGTH`).
pub const MAX_STARTUP_LENGTH: usize = 10_000;

/// Backend message type tags
pub mod tags {
    /// `R`: authentication request or result
    pub const AUTHENTICATION: u8 = b'R';

    /// `K`: cancellation key
    pub const BACKEND_KEY_DATA: u8 = b'K';

    /// `C`: statement finished
    pub const COMMAND_COMPLETE: u8 = b'C';

    /// `D`: one result row
    pub const DATA_ROW: u8 = b'D';

    /// `I`: empty query
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';

    /// `E`: error
    pub const ERROR_RESPONSE: u8 = b'E';

    /// `N`: notice
    pub const NOTICE_RESPONSE: u8 = b'N';

    /// `S`: run-time parameter report
    pub const PARAMETER_STATUS: u8 = b'S';

    /// `Z`: ready for the next query
    pub const READY_FOR_QUERY: u8 = b'Z';

    /// `T`: column layout
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Frontend message type tags
pub mod frontend_tags {
    /// Password, GSS, SASLInitialResponse and SASLResponse share this tag
    pub const PASSWORD: u8 = b'p';

    /// Simple query
    pub const QUERY: u8 = b'Q';

    /// Terminate
    pub const TERMINATE: u8 = b'X';

    /// Sync (extended query)
    pub const SYNC: u8 = b'S';

    /// Flush (extended query)
    pub const FLUSH: u8 = b'H';

    /// Parse (extended query)
    pub const PARSE: u8 = b'P';

    /// Bind (extended query)
    pub const BIND: u8 = b'B';

    /// Describe (extended query)
    pub const DESCRIBE: u8 = b'D';

    /// Execute (extended query)
    pub const EXECUTE: u8 = b'E';

    /// Close (extended query)
    pub const CLOSE: u8 = b'C';

    /// Copy failure
    pub const COPY_FAIL: u8 = b'f';

    /// Function call
    pub const FUNCTION_CALL: u8 = b'F';
}

/// Authentication request subtypes (`R` payload)
pub mod auth {
    /// AuthenticationOk
    pub const OK: i32 = 0;

    /// AuthenticationCleartextPassword
    pub const CLEARTEXT_PASSWORD: i32 = 3;

    /// AuthenticationSASL
    pub const SASL: i32 = 10;

    /// AuthenticationSASLContinue
    pub const SASL_CONTINUE: i32 = 11;

    /// AuthenticationSASLFinal
    pub const SASL_FINAL: i32 = 12;
}

/// ReadyForQuery transaction indicator
pub mod tx_status {
    /// Outside a transaction block
    pub const IDLE: u8 = b'I';

    /// Inside a transaction block
    pub const IN_TRANSACTION: u8 = b'T';

    /// Inside a failed transaction block
    pub const FAILED: u8 = b'E';
}

/// Single-byte answers to SSLRequest / GSSENCRequest
pub mod ssl_response {
    /// Server accepts the TLS upgrade
    pub const ACCEPT: u8 = b'S';

    /// Server declines; the client may continue unencrypted
    pub const DECLINE: u8 = b'N';
}
