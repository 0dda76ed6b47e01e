//! Postgres wire protocol codec
//!
//! Both directions of the v3 frontend/backend protocol: the server decodes
//! frontend messages and encodes backend messages, test clients and fuzz
//! targets do the opposite.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod error;
pub mod message;
pub mod sql_state;

pub use decode::{decode_backend, decode_frontend, Decoder};
pub use encode::{encode_backend, encode_backend_into, encode_frontend, encode_frontend_into};
pub use error::ProtocolError;
pub use message::{
    AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, FrontendMessage,
    FrontendPhase,
};
