//! PostgreSQL text-format encoding of cell values

use super::types::Value;
use bytes::Bytes;
use std::fmt::Write;

/// Encode a value in text format; `None` is sent as a NULL (length -1)
pub fn encode_value(value: &Value) -> Option<Bytes> {
    let text = match value {
        Value::Null => return None,
        Value::Bool(true) => return Some(Bytes::from_static(b"t")),
        Value::Bool(false) => return Some(Bytes::from_static(b"f")),
        Value::Int2(v) => v.to_string(),
        Value::Int4(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Float4(v) => format_float(f64::from(*v), v.to_string()),
        Value::Float8(v) => format_float(*v, v.to_string()),
        Value::Text(s) => s.clone(),
        Value::Bytea(data) => encode_bytea(data),
    };
    Some(Bytes::from(text))
}

/// Encode a whole row for a DataRow message
pub fn encode_row(row: &[Value]) -> Vec<Option<Bytes>> {
    row.iter().map(encode_value).collect()
}

fn format_float(v: f64, display: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        display
    }
}

/// `bytea_output = hex`
fn encode_bytea(data: &[u8]) -> String {
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for byte in data {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(v: Value) -> Option<String> {
        encode_value(&v).map(|b| String::from_utf8(b.to_vec()).unwrap())
    }

    #[test]
    fn test_bool_uses_single_letters() {
        assert_eq!(text(Value::Bool(true)).as_deref(), Some("t"));
        assert_eq!(text(Value::Bool(false)).as_deref(), Some("f"));
    }

    #[test]
    fn test_null_has_no_payload() {
        assert_eq!(text(Value::Null), None);
    }

    #[test]
    fn test_special_floats() {
        assert_eq!(text(Value::Float8(f64::NAN)).as_deref(), Some("NaN"));
        assert_eq!(
            text(Value::Float8(f64::INFINITY)).as_deref(),
            Some("Infinity")
        );
        assert_eq!(
            text(Value::Float4(f32::NEG_INFINITY)).as_deref(),
            Some("-Infinity")
        );
        assert_eq!(text(Value::Float8(1.5)).as_deref(), Some("1.5"));
        assert_eq!(text(Value::Float4(0.1)).as_deref(), Some("0.1"));
    }

    #[test]
    fn test_bytea_hex() {
        assert_eq!(
            text(Value::Bytea(vec![0xde, 0xad, 0x01])).as_deref(),
            Some("\\xdead01")
        );
        assert_eq!(text(Value::Bytea(vec![])).as_deref(), Some("\\x"));
    }

    #[test]
    fn test_integers_and_text() {
        assert_eq!(text(Value::Int8(-42)).as_deref(), Some("-42"));
        assert_eq!(
            text(Value::Text("DuckdbPgwire Sam 🐥".into())).as_deref(),
            Some("DuckdbPgwire Sam 🐥")
        );
    }
}
