//! Column types and values.
//!
//! [`Type`] names a destination column's wire type (one per supported PostgreSQL
//! type OID) and [`Value`] is a single typed scalar coming from a row source.
//! The two are deliberately decoupled: a value is encoded *into* a column type by
//! the encoder, which is where widening and range checks happen.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::protocol::types::type_oid;

/// Destination column type.
///
/// Each variant maps to a PostgreSQL type OID defined in
/// [`protocol::types::type_oid`](crate::protocol::types::type_oid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Boolean type.
    Bool,
    /// Variable-length binary string.
    Bytea,
    /// 2-byte integer.
    Int2,
    /// 4-byte integer.
    Int4,
    /// 8-byte integer.
    Int8,
    /// Single-precision floating-point.
    Float4,
    /// Double-precision floating-point.
    Float8,
    /// Arbitrary precision decimal.
    Numeric,
    /// Variable-length string.
    Text,
    /// Variable-length string with limit.
    Varchar,
    /// Fixed-length string.
    Bpchar,
    /// Internal identifier type.
    Name,
    /// 128-bit UUID.
    Uuid,
    /// Calendar date.
    Date,
    /// Time of day without time zone.
    Time,
    /// Timestamp without time zone.
    Timestamp,
    /// Timestamp with time zone.
    Timestamptz,
    /// JSON stored as text.
    Json,
    /// JSON stored in the decomposed binary form.
    Jsonb,
}

impl Type {
    /// Returns true for the integer types an identity column can have.
    pub const fn is_integer(self) -> bool {
        matches!(self, Type::Int2 | Type::Int4 | Type::Int8)
    }

    /// Returns the type OID.
    pub const fn oid(self) -> u32 {
        match self {
            Type::Bool => type_oid::BOOL,
            Type::Bytea => type_oid::BYTEA,
            Type::Int2 => type_oid::INT2,
            Type::Int4 => type_oid::INT4,
            Type::Int8 => type_oid::INT8,
            Type::Float4 => type_oid::FLOAT4,
            Type::Float8 => type_oid::FLOAT8,
            Type::Numeric => type_oid::NUMERIC,
            Type::Text => type_oid::TEXT,
            Type::Varchar => type_oid::VARCHAR,
            Type::Bpchar => type_oid::BPCHAR,
            Type::Name => type_oid::NAME,
            Type::Uuid => type_oid::UUID,
            Type::Date => type_oid::DATE,
            Type::Time => type_oid::TIME,
            Type::Timestamp => type_oid::TIMESTAMP,
            Type::Timestamptz => type_oid::TIMESTAMPTZ,
            Type::Json => type_oid::JSON,
            Type::Jsonb => type_oid::JSONB,
        }
    }

    /// Converts a type OID into a [`Type`].
    ///
    /// Returns `None` if the OID does not correspond to a supported type.
    pub const fn from_oid(oid: u32) -> Option<Self> {
        match oid {
            type_oid::BOOL => Some(Type::Bool),
            type_oid::BYTEA => Some(Type::Bytea),
            type_oid::NAME => Some(Type::Name),
            type_oid::INT8 => Some(Type::Int8),
            type_oid::INT2 => Some(Type::Int2),
            type_oid::INT4 => Some(Type::Int4),
            type_oid::TEXT => Some(Type::Text),
            type_oid::JSON => Some(Type::Json),
            type_oid::FLOAT4 => Some(Type::Float4),
            type_oid::FLOAT8 => Some(Type::Float8),
            type_oid::BPCHAR => Some(Type::Bpchar),
            type_oid::VARCHAR => Some(Type::Varchar),
            type_oid::DATE => Some(Type::Date),
            type_oid::TIME => Some(Type::Time),
            type_oid::TIMESTAMP => Some(Type::Timestamp),
            type_oid::TIMESTAMPTZ => Some(Type::Timestamptz),
            type_oid::NUMERIC => Some(Type::Numeric),
            type_oid::UUID => Some(Type::Uuid),
            type_oid::JSONB => Some(Type::Jsonb),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "boolean",
            Type::Bytea => "bytea",
            Type::Int2 => "smallint",
            Type::Int4 => "integer",
            Type::Int8 => "bigint",
            Type::Float4 => "real",
            Type::Float8 => "double precision",
            Type::Numeric => "numeric",
            Type::Text => "text",
            Type::Varchar => "character varying",
            Type::Bpchar => "character",
            Type::Name => "name",
            Type::Uuid => "uuid",
            Type::Date => "date",
            Type::Time => "time without time zone",
            Type::Timestamp => "timestamp without time zone",
            Type::Timestamptz => "timestamp with time zone",
            Type::Json => "json",
            Type::Jsonb => "jsonb",
        };
        write!(f, "{}", name)
    }
}

/// A typed value supplied by a row source.
///
/// Variable-length values are heap-allocated. `Numeric` keeps the decimal in its
/// canonical text form (`-12.50`); it is validated when encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL (type is unknown/any).
    Null,
    /// Boolean (true/false).
    Boolean(bool),
    /// 16-bit signed integer (SMALLINT).
    Int16(i16),
    /// 32-bit signed integer (INTEGER).
    Int32(i32),
    /// 64-bit signed integer (BIGINT).
    Int64(i64),
    /// 32-bit floating point (REAL).
    Float32(f32),
    /// 64-bit floating point (DOUBLE PRECISION).
    Float64(f64),
    /// Decimal in plain positional notation (NUMERIC).
    Numeric(String),
    /// Variable-length text (TEXT, VARCHAR, CHAR).
    Text(String),
    /// Variable-length binary (BYTEA).
    Bytea(Vec<u8>),
    /// UUID.
    Uuid(Uuid),
    /// DATE.
    Date(NaiveDate),
    /// TIME.
    Time(NaiveTime),
    /// TIMESTAMP.
    Timestamp(NaiveDateTime),
    /// TIMESTAMPTZ.
    TimestampTz(DateTime<Utc>),
    /// JSON / JSONB document.
    Json(serde_json::Value),
}

impl Value {
    /// Returns a short name for the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Json(_) => "json",
        }
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as an `i64` if it is an integer of any width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int16(n) => Some(i64::from(*n)),
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Parses a text-format result column into a value of type `ty`.
    ///
    /// Only the scalar types that come back from driving statements (identities
    /// and the occasional flag) are parsed; anything else is kept as text.
    pub fn from_text(ty: Type, text: &str) -> Option<Value> {
        match ty {
            Type::Bool => match text {
                "t" | "true" => Some(Value::Boolean(true)),
                "f" | "false" => Some(Value::Boolean(false)),
                _ => None,
            },
            Type::Int2 => text.parse().ok().map(Value::Int16),
            Type::Int4 => text.parse().ok().map(Value::Int32),
            Type::Int8 => text.parse().ok().map(Value::Int64),
            Type::Float4 => text.parse().ok().map(Value::Float32),
            Type::Float8 => text.parse().ok().map(Value::Float64),
            Type::Uuid => Uuid::parse_str(text).ok().map(Value::Uuid),
            Type::Numeric => Some(Value::Numeric(text.to_string())),
            _ => Some(Value::Text(text.to_string())),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Boolean,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
    Vec<u8> => Bytea,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
    serde_json::Value => Json,
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

/// Error returned when a [`Value`] cannot be converted into a Rust scalar.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot convert {found} value into {target}")]
pub struct ValueConversionError {
    pub found: &'static str,
    pub target: &'static str,
}

macro_rules! impl_try_from_integer {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = ValueConversionError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    let err = ValueConversionError {
                        found: value.kind_name(),
                        target: stringify!($ty),
                    };
                    value
                        .as_i64()
                        .and_then(|n| <$ty>::try_from(n).ok())
                        .ok_or(err)
                }
            }
        )*
    };
}

impl_try_from_integer!(i16, i32, i64);
