//! Protocol message decoding
//!
//! Decoding is resumable: every decoder returns `Ok(None)` until the whole
//! length-prefixed frame is buffered, and `Ok(Some((msg, consumed)))` once it
//! is. The caller advances its buffer by `consumed`. Nothing is consumed on
//! `Ok(None)`, so the same bytes can be offered again with more appended.

use super::constants::{
    auth, frontend_tags, tags, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, MAX_MESSAGE_LENGTH,
    MAX_STARTUP_LENGTH, SSL_REQUEST_CODE,
};
use super::error::ProtocolError;
use super::message::{
    AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, FrontendMessage,
    FrontendPhase,
};
use bytes::Bytes;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Frame decoder with a configurable maximum frame size
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    max_frame_len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_MESSAGE_LENGTH,
        }
    }
}

impl Decoder {
    /// Create a decoder rejecting payloads longer than `max_frame_len`
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Configured frame limit
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Decode one frontend message from the front of `data`
    pub fn frontend(
        &self,
        data: &[u8],
        phase: FrontendPhase,
    ) -> Result<Option<(FrontendMessage, usize)>> {
        if phase == FrontendPhase::Startup {
            return self.startup(data);
        }

        let Some((tag, body, consumed)) = self.tagged_frame(data)? else {
            return Ok(None);
        };

        let msg = match tag {
            frontend_tags::QUERY => FrontendMessage::Query(Cursor::new(body).cstr("query")?),
            frontend_tags::TERMINATE => FrontendMessage::Terminate,
            frontend_tags::SYNC => FrontendMessage::Sync,
            frontend_tags::FLUSH => FrontendMessage::Flush,
            frontend_tags::PASSWORD => decode_password_family(body, phase)?,
            frontend_tags::PARSE
            | frontend_tags::BIND
            | frontend_tags::DESCRIBE
            | frontend_tags::EXECUTE
            | frontend_tags::CLOSE
            | frontend_tags::COPY_FAIL
            | frontend_tags::FUNCTION_CALL => FrontendMessage::Unsupported {
                tag,
                body: Bytes::copy_from_slice(body),
            },
            other => return Err(ProtocolError::UnknownTag(other)),
        };

        Ok(Some((msg, consumed)))
    }

    /// Decode one backend message from the front of `data`
    pub fn backend(&self, data: &[u8]) -> Result<Option<(BackendMessage, usize)>> {
        let Some((tag, body, consumed)) = self.tagged_frame(data)? else {
            return Ok(None);
        };

        let msg = match tag {
            tags::AUTHENTICATION => decode_authentication(body)?,
            tags::BACKEND_KEY_DATA => decode_backend_key_data(body)?,
            tags::COMMAND_COMPLETE => {
                BackendMessage::CommandComplete(Cursor::new(body).cstr("command tag")?)
            }
            tags::DATA_ROW => decode_data_row(body)?,
            tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
            tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(body)?),
            tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(body)?),
            tags::PARAMETER_STATUS => decode_parameter_status(body)?,
            tags::READY_FOR_QUERY => decode_ready_for_query(body)?,
            tags::ROW_DESCRIPTION => decode_row_description(body)?,
            other => return Err(ProtocolError::UnknownTag(other)),
        };

        Ok(Some((msg, consumed)))
    }

    /// Split off a `tag | len | body` frame once it is complete.
    fn tagged_frame<'a>(&self, data: &'a [u8]) -> Result<Option<(u8, &'a [u8], usize)>> {
        if data.len() < 5 {
            return Ok(None);
        }

        let tag = data[0];
        let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let body_len = self.body_len(len)?;

        let total = 1 + 4 + body_len;
        if data.len() < total {
            return Ok(None);
        }

        Ok(Some((tag, &data[5..total], total)))
    }

    /// Validate a length prefix (which counts itself) and return the payload size
    fn body_len(&self, len: i32) -> Result<usize> {
        if len < 4 {
            return Err(ProtocolError::InvalidLength(len));
        }
        let body_len = len as usize - 4;
        if body_len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len: body_len,
                max: self.max_frame_len,
            });
        }
        Ok(body_len)
    }

    /// Decode the untagged startup family
    fn startup(&self, data: &[u8]) -> Result<Option<(FrontendMessage, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }

        let len = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if len < 8 {
            return Err(ProtocolError::InvalidLength(len));
        }
        let total = len as usize;
        let limit = MAX_STARTUP_LENGTH.min(self.max_frame_len.saturating_add(4));
        if total > limit {
            return Err(ProtocolError::FrameTooLarge {
                len: total - 4,
                max: limit - 4,
            });
        }
        if data.len() < total {
            return Ok(None);
        }

        let mut cur = Cursor::new(&data[4..total]);
        let code = cur.i32("protocol code")?;

        let msg = match code {
            SSL_REQUEST_CODE => FrontendMessage::SslRequest,
            GSSENC_REQUEST_CODE => FrontendMessage::GssEncRequest,
            CANCEL_REQUEST_CODE => FrontendMessage::CancelRequest {
                process_id: cur.i32("process id")?,
                secret_key: cur.i32("secret key")?,
            },
            version => {
                let mut params = Vec::new();
                while !cur.is_empty() {
                    let key = cur.cstr("parameter name")?;
                    if key.is_empty() {
                        break;
                    }
                    let value = cur.cstr("parameter value")?;
                    params.push((key, value));
                }
                FrontendMessage::Startup { version, params }
            }
        };

        Ok(Some((msg, total)))
    }
}

/// Decode a frontend message with the default frame limit
pub fn decode_frontend(
    data: &[u8],
    phase: FrontendPhase,
) -> Result<Option<(FrontendMessage, usize)>> {
    Decoder::default().frontend(data, phase)
}

/// Decode a backend message with the default frame limit
pub fn decode_backend(data: &[u8]) -> Result<Option<(BackendMessage, usize)>> {
    Decoder::default().backend(data)
}

fn decode_password_family(body: &[u8], phase: FrontendPhase) -> Result<FrontendMessage> {
    let mut cur = Cursor::new(body);
    match phase {
        FrontendPhase::Password => Ok(FrontendMessage::Password(cur.cstr("password")?)),
        FrontendPhase::SaslInitial => {
            let mechanism = cur.cstr("SASL mechanism")?;
            let len = cur.i32("SASL data length")?;
            let data = if len < 0 {
                Vec::new()
            } else {
                cur.bytes(len as usize, "SASL data")?.to_vec()
            };
            Ok(FrontendMessage::SaslInitialResponse { mechanism, data })
        }
        FrontendPhase::SaslResponse => Ok(FrontendMessage::SaslResponse {
            data: body.to_vec(),
        }),
        FrontendPhase::Startup | FrontendPhase::Ready => Ok(FrontendMessage::Unsupported {
            tag: frontend_tags::PASSWORD,
            body: Bytes::copy_from_slice(body),
        }),
    }
}

fn decode_authentication(data: &[u8]) -> Result<BackendMessage> {
    let mut cur = Cursor::new(data);
    let auth_type = cur.i32("auth type")?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::SASL => {
            // Mechanism list: null-terminated strings ending with an empty one
            let mut mechanisms = Vec::new();
            while !cur.is_empty() {
                let mechanism = cur.cstr("SASL mechanism")?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: cur.rest().to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: cur.rest().to_vec(),
        },
        _ => {
            return Err(ProtocolError::Malformed(format!(
                "unsupported auth type: {}",
                auth_type
            )))
        }
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(data: &[u8]) -> Result<BackendMessage> {
    let mut cur = Cursor::new(data);
    Ok(BackendMessage::BackendKeyData {
        process_id: cur.i32("backend key data")?,
        secret_key: cur.i32("backend key data")?,
    })
}

fn decode_data_row(data: &[u8]) -> Result<BackendMessage> {
    let mut cur = Cursor::new(data);
    let field_count = cur.i16("field count")?;
    if field_count < 0 {
        return Err(ProtocolError::Malformed("negative field count".into()));
    }
    let mut fields = Vec::with_capacity(field_count as usize);

    for _ in 0..field_count {
        let field_len = cur.i32("field length")?;
        let field = if field_len == -1 {
            None
        } else if field_len < 0 {
            return Err(ProtocolError::Malformed(format!(
                "invalid field length: {}",
                field_len
            )));
        } else {
            Some(Bytes::copy_from_slice(
                cur.bytes(field_len as usize, "field data")?,
            ))
        };
        fields.push(field);
    }

    Ok(BackendMessage::DataRow(fields))
}

fn decode_error_fields(data: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut cur = Cursor::new(data);

    while !cur.is_empty() {
        let field_type = cur.u8("error field type")?;
        if field_type == 0 {
            break;
        }
        let value = cur.cstr("error field")?;

        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = Some(value),
            _ => {} // Ignore unknown fields (including non-localized severity 'V')
        }
    }

    Ok(fields)
}

fn decode_parameter_status(data: &[u8]) -> Result<BackendMessage> {
    let mut cur = Cursor::new(data);
    let name = cur.cstr("parameter name")?;
    let value = cur.cstr("parameter value")?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

fn decode_ready_for_query(data: &[u8]) -> Result<BackendMessage> {
    let status = Cursor::new(data).u8("status byte")?;
    Ok(BackendMessage::ReadyForQuery { status })
}

fn decode_row_description(data: &[u8]) -> Result<BackendMessage> {
    let mut cur = Cursor::new(data);
    let field_count = cur.i16("field count")?;
    if field_count < 0 {
        return Err(ProtocolError::Malformed("negative field count".into()));
    }
    let mut fields = Vec::with_capacity(field_count as usize);

    for _ in 0..field_count {
        fields.push(FieldDescription {
            name: cur.cstr("field name")?,
            table_oid: cur.i32("field descriptor")?,
            column_attr: cur.i16("field descriptor")?,
            type_oid: cur.i32("field descriptor")? as u32,
            type_size: cur.i16("field descriptor")?,
            type_modifier: cur.i32("field descriptor")?,
            format_code: cur.i16("field descriptor")?,
        });
    }

    Ok(BackendMessage::RowDescription(fields))
}

/// Bounds-checked reader over a message payload
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset.min(self.data.len())..];
        self.offset = self.data.len();
        rest
    }

    fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ProtocolError::Truncated(what))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.bytes(1, what)?[0])
    }

    fn i16(&mut self, what: &'static str) -> Result<i16> {
        let b = self.bytes(2, what)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32> {
        let b = self.bytes(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a null-terminated UTF-8 string
    fn cstr(&mut self, what: &'static str) -> Result<String> {
        let remaining = &self.data[self.offset.min(self.data.len())..];
        let end = remaining.iter().position(|&b| b == 0).ok_or_else(|| {
            ProtocolError::Malformed(format!("missing null terminator in {}", what))
        })?;
        let value = std::str::from_utf8(&remaining[..end])
            .map_err(|_| ProtocolError::Malformed(format!("invalid UTF-8 in {}", what)))?
            .to_string();
        self.offset += end + 1;
        Ok(value)
    }
}
