//! Wire-level framing errors

use thiserror::Error;

/// A message that cannot be framed or parsed.
///
/// Every variant is fatal for the connection that produced it: once framing
/// is lost there is no way to find the start of the next message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Length prefix smaller than the length field itself (or negative)
    #[error("invalid message length: {0}")]
    InvalidLength(i32),

    /// Length prefix above the configured frame limit
    #[error("message length {len} exceeds maximum allowed {max}")]
    FrameTooLarge {
        /// Declared payload length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Tag byte that is not part of the protocol
    #[error("unknown message tag: 0x{0:02X}")]
    UnknownTag(u8),

    /// Payload shorter than its fields require
    #[error("truncated message: {0}")]
    Truncated(&'static str),

    /// Payload with a structural defect
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Well-formed message that is not allowed at this point of the conversation
    #[error("protocol violation: {0}")]
    Violation(String),
}
