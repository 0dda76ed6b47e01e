//! Protocol message encoding
//!
//! Encoding is total: every message value has exactly one byte form.

use super::constants::{
    auth, frontend_tags, tags, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, SSL_REQUEST_CODE,
};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage};
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_frontend(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_frontend_into(&mut buf, msg);
    buf
}

/// Encode a backend message into bytes
pub fn encode_backend(msg: &BackendMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_backend_into(&mut buf, msg);
    buf
}

/// Append a frontend message to `buf`
pub fn encode_frontend_into(buf: &mut BytesMut, msg: &FrontendMessage) {
    match msg {
        FrontendMessage::Startup { version, params } => encode_startup(buf, *version, params),
        FrontendMessage::SslRequest => encode_request_code(buf, SSL_REQUEST_CODE),
        FrontendMessage::GssEncRequest => encode_request_code(buf, GSSENC_REQUEST_CODE),
        FrontendMessage::CancelRequest {
            process_id,
            secret_key,
        } => {
            buf.put_i32(16);
            buf.put_i32(CANCEL_REQUEST_CODE);
            buf.put_i32(*process_id);
            buf.put_i32(*secret_key);
        }
        FrontendMessage::Password(password) => {
            tagged(buf, frontend_tags::PASSWORD, |buf| put_cstr(buf, password))
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            tagged(buf, frontend_tags::PASSWORD, |buf| {
                put_cstr(buf, mechanism);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            })
        }
        FrontendMessage::SaslResponse { data } => {
            tagged(buf, frontend_tags::PASSWORD, |buf| buf.put_slice(data))
        }
        FrontendMessage::Query(query) => tagged(buf, frontend_tags::QUERY, |buf| put_cstr(buf, query)),
        FrontendMessage::Sync => tagged(buf, frontend_tags::SYNC, |_| {}),
        FrontendMessage::Flush => tagged(buf, frontend_tags::FLUSH, |_| {}),
        FrontendMessage::Terminate => tagged(buf, frontend_tags::TERMINATE, |_| {}),
        FrontendMessage::Unsupported { tag, body } => tagged(buf, *tag, |buf| buf.put_slice(body)),
    }
}

/// Append a backend message to `buf`
pub fn encode_backend_into(buf: &mut BytesMut, msg: &BackendMessage) {
    match msg {
        BackendMessage::Authentication(auth_msg) => {
            tagged(buf, tags::AUTHENTICATION, |buf| encode_authentication(buf, auth_msg))
        }
        BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        } => tagged(buf, tags::BACKEND_KEY_DATA, |buf| {
            buf.put_i32(*process_id);
            buf.put_i32(*secret_key);
        }),
        BackendMessage::CommandComplete(tag) => {
            tagged(buf, tags::COMMAND_COMPLETE, |buf| put_cstr(buf, tag))
        }
        BackendMessage::DataRow(fields) => tagged(buf, tags::DATA_ROW, |buf| {
            buf.put_i16(fields.len() as i16);
            for field in fields {
                match field {
                    Some(data) => {
                        buf.put_i32(data.len() as i32);
                        buf.put_slice(data);
                    }
                    None => buf.put_i32(-1),
                }
            }
        }),
        BackendMessage::EmptyQueryResponse => tagged(buf, tags::EMPTY_QUERY_RESPONSE, |_| {}),
        BackendMessage::ErrorResponse(fields) => {
            tagged(buf, tags::ERROR_RESPONSE, |buf| encode_error_fields(buf, fields))
        }
        BackendMessage::NoticeResponse(fields) => {
            tagged(buf, tags::NOTICE_RESPONSE, |buf| encode_error_fields(buf, fields))
        }
        BackendMessage::ParameterStatus { name, value } => {
            tagged(buf, tags::PARAMETER_STATUS, |buf| {
                put_cstr(buf, name);
                put_cstr(buf, value);
            })
        }
        BackendMessage::ReadyForQuery { status } => {
            tagged(buf, tags::READY_FOR_QUERY, |buf| buf.put_u8(*status))
        }
        BackendMessage::RowDescription(fields) => tagged(buf, tags::ROW_DESCRIPTION, |buf| {
            buf.put_i16(fields.len() as i16);
            for field in fields {
                put_cstr(buf, &field.name);
                buf.put_i32(field.table_oid);
                buf.put_i16(field.column_attr);
                buf.put_u32(field.type_oid);
                buf.put_i16(field.type_size);
                buf.put_i32(field.type_modifier);
                buf.put_i16(field.format_code);
            }
        }),
    }
}

/// Write `tag`, a length placeholder and the body, then fill in the length
fn tagged(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_i32(0);

    body(buf);

    // Length includes itself but not the tag
    let len = buf.len() - len_pos;
    buf[len_pos..len_pos + 4].copy_from_slice(&(len as i32).to_be_bytes());
}

fn encode_startup(buf: &mut BytesMut, version: i32, params: &[(String, String)]) {
    // Startup messages don't have a type byte
    let len_pos = buf.len();
    buf.put_i32(0);

    buf.put_i32(version);

    for (key, value) in params {
        put_cstr(buf, key);
        put_cstr(buf, value);
    }

    // Final null terminator
    buf.put_u8(0);

    let len = buf.len() - len_pos;
    buf[len_pos..len_pos + 4].copy_from_slice(&(len as i32).to_be_bytes());
}

fn encode_request_code(buf: &mut BytesMut, code: i32) {
    buf.put_i32(8); // Length (includes itself)
    buf.put_i32(code);
}

fn encode_authentication(buf: &mut BytesMut, msg: &AuthenticationMessage) {
    match msg {
        AuthenticationMessage::Ok => buf.put_i32(auth::OK),
        AuthenticationMessage::CleartextPassword => buf.put_i32(auth::CLEARTEXT_PASSWORD),
        AuthenticationMessage::Sasl { mechanisms } => {
            buf.put_i32(auth::SASL);
            for mechanism in mechanisms {
                put_cstr(buf, mechanism);
            }
            buf.put_u8(0);
        }
        AuthenticationMessage::SaslContinue { data } => {
            buf.put_i32(auth::SASL_CONTINUE);
            buf.put_slice(data);
        }
        AuthenticationMessage::SaslFinal { data } => {
            buf.put_i32(auth::SASL_FINAL);
            buf.put_slice(data);
        }
    }
}

fn encode_error_fields(buf: &mut BytesMut, fields: &ErrorFields) {
    if let Some(severity) = &fields.severity {
        put_field(buf, b'S', severity);
        // Non-localized copy, read by libpq 9.6+
        put_field(buf, b'V', severity);
    }
    let rest = [
        (b'C', &fields.code),
        (b'M', &fields.message),
        (b'D', &fields.detail),
        (b'H', &fields.hint),
        (b'P', &fields.position),
    ];
    for (field_type, value) in rest {
        if let Some(value) = value {
            put_field(buf, field_type, value);
        }
    }
    buf.put_u8(0);
}

fn put_field(buf: &mut BytesMut, field_type: u8, value: &str) {
    buf.put_u8(field_type);
    put_cstr(buf, value);
}

/// Write `s` NUL-terminated; interior NULs are dropped so the frame layout holds
fn put_cstr(buf: &mut BytesMut, s: &str) {
    for part in s.split('\0') {
        buf.put_slice(part.as_bytes());
    }
    buf.put_u8(0);
}
