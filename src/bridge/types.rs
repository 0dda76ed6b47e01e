//! Typed cell values and column metadata

use crate::protocol::FieldDescription;

/// Logical column type, as described to clients in RowDescription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// `bool`
    Bool,
    /// `int2` / `smallint`
    Int2,
    /// `int4` / `integer`
    Int4,
    /// `int8` / `bigint`
    Int8,
    /// `float4` / `real`
    Float4,
    /// `float8` / `double precision`
    Float8,
    /// `text`
    Text,
    /// `varchar`
    Varchar,
    /// `bytea`
    Bytea,
    /// Type could not be inferred (e.g. a bare NULL literal)
    Unknown,
}

impl DataType {
    /// PostgreSQL type OID (`pg_type.oid`)
    pub fn oid(&self) -> u32 {
        match self {
            DataType::Bool => 16,
            DataType::Bytea => 17,
            DataType::Int8 => 20,
            DataType::Int2 => 21,
            DataType::Int4 => 23,
            DataType::Text => 25,
            DataType::Float4 => 700,
            DataType::Float8 => 701,
            DataType::Unknown => 705,
            DataType::Varchar => 1043,
        }
    }

    /// PostgreSQL type size (`pg_type.typlen`); -1 for varlena, -2 for C strings
    pub fn type_size(&self) -> i16 {
        match self {
            DataType::Bool => 1,
            DataType::Int2 => 2,
            DataType::Int4 | DataType::Float4 => 4,
            DataType::Int8 | DataType::Float8 => 8,
            DataType::Text | DataType::Varchar | DataType::Bytea => -1,
            DataType::Unknown => -2,
        }
    }

    /// SQL type name
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "boolean",
            DataType::Int2 => "smallint",
            DataType::Int4 => "integer",
            DataType::Int8 => "bigint",
            DataType::Float4 => "real",
            DataType::Float8 => "double precision",
            DataType::Text => "text",
            DataType::Varchar => "varchar",
            DataType::Bytea => "bytea",
            DataType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 16-bit integer
    Int2(i16),
    /// 32-bit integer
    Int4(i32),
    /// 64-bit integer
    Int8(i64),
    /// Single-precision float
    Float4(f32),
    /// Double-precision float
    Float8(f64),
    /// Character data
    Text(String),
    /// Binary data
    Bytea(Vec<u8>),
}

impl Value {
    /// Natural column type of this value; `Unknown` for NULL
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Bool(_) => DataType::Bool,
            Value::Int2(_) => DataType::Int2,
            Value::Int4(_) => DataType::Int4,
            Value::Int8(_) => DataType::Int8,
            Value::Float4(_) => DataType::Float4,
            Value::Float8(_) => DataType::Float8,
            Value::Text(_) => DataType::Text,
            Value::Bytea(_) => DataType::Bytea,
        }
    }

    /// Whether this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text payload, if this is a text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name as shown to the client
    pub name: String,
    /// Column type
    pub data_type: DataType,
}

impl Column {
    /// Create a column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// RowDescription entry for this column (text format, no source table)
    pub fn field_description(&self) -> FieldDescription {
        FieldDescription {
            name: self.name.clone(),
            table_oid: 0,
            column_attr: 0,
            type_oid: self.data_type.oid(),
            type_size: self.data_type.type_size(),
            type_modifier: -1,
            format_code: 0,
        }
    }
}
