//! Type-directed binary COPY encoding.
//!
//! The encoder turns source rows into binary COPY tuples for the staging
//! columns of a [`ResolvedShape`]. Each value is framed according to its
//! *column's* type, not its own: an `Int64` bound for a `smallint` column is
//! range-checked and written as two bytes.
//!
//! Output accumulates in a [`BytesMut`] that the caller drains with
//! [`CopyEncoder::take`] whenever it grows past its flush threshold.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use crate::datum::{Type, Value};
use crate::error::{EncodingError, EncodingErrorKind};
use crate::protocol::copy;
use crate::schema::{ColumnDescriptor, ResolvedShape};
use crate::source::Row;

/// `NaiveDate::num_days_from_ce()` of 2000-01-01, the PostgreSQL epoch.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;
const MICROS_PER_DAY: i64 = 86_400_000_000;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_DSCALE_MAX: usize = 0x3FFF;

const JSONB_VERSION: u8 = 1;

/// Encodes rows of one batch into a binary COPY stream.
pub struct CopyEncoder<'s> {
    columns: &'s [ColumnDescriptor],
    sources: &'s [usize],
    /// Columns whose NULLs would be written into a NOT NULL target column.
    not_null: Vec<bool>,
    /// Append the batch-local ordinal as a trailing `int8` column.
    with_ordinal: bool,
    field_count: i16,
    buf: BytesMut,
}

impl<'s> CopyEncoder<'s> {
    /// Creates an encoder and writes the stream header.
    pub fn new(shape: &'s ResolvedShape, with_ordinal: bool) -> Self {
        let fields = shape.columns.len() + usize::from(with_ordinal);
        let mut buf = BytesMut::with_capacity(8 * 1024);
        copy::put_header(&mut buf);
        Self {
            columns: &shape.columns,
            sources: &shape.sources,
            not_null: vec![false; shape.columns.len()],
            with_ordinal,
            field_count: i16::try_from(fields).unwrap_or(i16::MAX),
            buf,
        }
    }

    /// Rejects NULL for every column flagged in `not_null` (parallel to the
    /// shape's columns) instead of leaving it to the server.
    pub fn reject_null(mut self, not_null: Vec<bool>) -> Self {
        self.not_null = not_null;
        self.not_null.resize(self.columns.len(), false);
        self
    }

    /// Appends one tuple.
    ///
    /// `row_ordinal` is the row's absolute position in the source (used for
    /// error context); `batch_ordinal` is written into the ordinal column.
    pub fn encode_row(
        &mut self,
        row: &Row,
        row_ordinal: u64,
        batch_ordinal: i64,
    ) -> Result<(), EncodingError> {
        copy::put_tuple_start(&mut self.buf, self.field_count);
        let fields = self.columns.iter().zip(self.sources).zip(&self.not_null);
        for ((column, &source), &not_null) in fields {
            let value = row.get(source).unwrap_or(&Value::Null);
            let encoded = if not_null && value.is_null() {
                Err(EncodingErrorKind::NullNotAllowed)
            } else {
                encode_field(&mut self.buf, column, value)
            };
            encoded.map_err(|kind| EncodingError {
                column: column.name.clone(),
                row: row_ordinal,
                kind,
            })?;
        }
        if self.with_ordinal {
            self.buf.put_i32(8);
            self.buf.put_i64(batch_ordinal);
        }
        Ok(())
    }

    /// Writes the end-of-data trailer.
    pub fn finish(&mut self) {
        copy::put_trailer(&mut self.buf);
    }

    /// Bytes encoded but not yet taken.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drains the buffered bytes.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Writes one field (length prefix and payload) for `column`.
pub fn encode_field(
    dst: &mut BytesMut,
    column: &ColumnDescriptor,
    value: &Value,
) -> Result<(), EncodingErrorKind> {
    if value.is_null() {
        copy::put_null(dst);
        return Ok(());
    }
    let Some(ty) = column.ty else {
        return Err(EncodingErrorKind::Unsupported {
            type_name: column.type_name.clone(),
        });
    };
    encode_value(dst, ty, value)
}

/// Writes a non-null `value` framed as `ty`.
pub fn encode_value(dst: &mut BytesMut, ty: Type, value: &Value) -> Result<(), EncodingErrorKind> {
    let mismatch = || EncodingErrorKind::TypeMismatch {
        expected: ty,
        found: value.kind_name(),
    };
    let overflow = || EncodingErrorKind::Overflow { target: ty };

    match (ty, value) {
        (Type::Bool, Value::Boolean(b)) => {
            dst.put_i32(1);
            dst.put_u8(u8::from(*b));
        }
        (Type::Int2, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            dst.put_i32(2);
            dst.put_i16(i16::try_from(n).map_err(|_| overflow())?);
        }
        (Type::Int4, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            dst.put_i32(4);
            dst.put_i32(i32::try_from(n).map_err(|_| overflow())?);
        }
        (Type::Int8, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            dst.put_i32(8);
            dst.put_i64(n);
        }
        (Type::Float4, v) => {
            let f = match v {
                Value::Float32(f) => *f,
                Value::Float64(f) if f.is_finite() && f.abs() > f64::from(f32::MAX) => {
                    return Err(overflow());
                }
                Value::Float64(f) => *f as f32,
                v => v.as_i64().ok_or_else(mismatch)? as f32,
            };
            dst.put_i32(4);
            dst.put_f32(f);
        }
        (Type::Float8, v) => {
            let f = match v {
                Value::Float32(f) => f64::from(*f),
                Value::Float64(f) => *f,
                v => v.as_i64().ok_or_else(mismatch)? as f64,
            };
            dst.put_i32(8);
            dst.put_f64(f);
        }
        (Type::Numeric, Value::Numeric(text) | Value::Text(text)) => put_numeric(dst, text)?,
        (Type::Numeric, Value::Float32(f)) => put_float_numeric(dst, *f)?,
        (Type::Numeric, Value::Float64(f)) => put_float_numeric(dst, *f)?,
        (Type::Numeric, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            put_numeric(dst, &n.to_string())?;
        }
        (Type::Text | Type::Varchar | Type::Bpchar | Type::Name, Value::Text(s)) => {
            put_bytes(dst, s.as_bytes())?;
        }
        (Type::Bytea, Value::Bytea(b)) => put_bytes(dst, b)?,
        (Type::Uuid, Value::Uuid(u)) => put_bytes(dst, u.as_bytes())?,
        (Type::Uuid, Value::Text(s)) => {
            let u = Uuid::parse_str(s).map_err(|e| EncodingErrorKind::InvalidValue {
                target: ty,
                reason: e.to_string(),
            })?;
            put_bytes(dst, u.as_bytes())?;
        }
        (Type::Date, Value::Date(d)) => {
            dst.put_i32(4);
            dst.put_i32(pg_days(*d).ok_or_else(overflow)?);
        }
        (Type::Time, Value::Time(t)) => {
            dst.put_i32(8);
            dst.put_i64(time_micros(*t));
        }
        (Type::Timestamp | Type::Timestamptz, Value::Timestamp(ts)) => {
            dst.put_i32(8);
            dst.put_i64(pg_micros(*ts).ok_or_else(overflow)?);
        }
        (Type::Timestamp | Type::Timestamptz, Value::TimestampTz(ts)) => {
            dst.put_i32(8);
            dst.put_i64(pg_micros(ts.naive_utc()).ok_or_else(overflow)?);
        }
        (Type::Json, Value::Json(doc)) => put_bytes(dst, doc.to_string().as_bytes())?,
        (Type::Json, Value::Text(s)) => {
            check_json(s, ty)?;
            put_bytes(dst, s.as_bytes())?;
        }
        (Type::Jsonb, Value::Json(doc)) => put_jsonb(dst, &doc.to_string())?,
        (Type::Jsonb, Value::Text(s)) => {
            check_json(s, ty)?;
            put_jsonb(dst, s)?;
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn put_bytes(dst: &mut BytesMut, payload: &[u8]) -> Result<(), EncodingErrorKind> {
    let len = i32::try_from(payload.len()).map_err(|_| EncodingErrorKind::TooLarge)?;
    dst.put_i32(len);
    dst.put_slice(payload);
    Ok(())
}

fn put_jsonb(dst: &mut BytesMut, text: &str) -> Result<(), EncodingErrorKind> {
    let at = copy::begin_field(dst);
    dst.put_u8(JSONB_VERSION);
    dst.put_slice(text.as_bytes());
    copy::end_field(dst, at).ok_or(EncodingErrorKind::TooLarge)
}

fn check_json(text: &str, ty: Type) -> Result<(), EncodingErrorKind> {
    serde_json::from_str::<serde::de::IgnoredAny>(text)
        .map(|_| ())
        .map_err(|e| EncodingErrorKind::InvalidValue {
            target: ty,
            reason: e.to_string(),
        })
}

fn pg_days(date: NaiveDate) -> Option<i32> {
    date.num_days_from_ce().checked_sub(PG_EPOCH_DAYS_FROM_CE)
}

fn time_micros(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1_000_000 + i64::from(time.nanosecond() / 1_000)
}

fn pg_micros(ts: NaiveDateTime) -> Option<i64> {
    let days = i64::from(pg_days(ts.date())?);
    days.checked_mul(MICROS_PER_DAY)?
        .checked_add(time_micros(ts.time()))
}

/// Formats `f` at its own precision, so `0.1f32` is stored as `0.1` rather
/// than its widened `f64` expansion.
fn put_float_numeric<F>(dst: &mut BytesMut, f: F) -> Result<(), EncodingErrorKind>
where
    F: Into<f64> + ToString + Copy,
{
    let wide: f64 = f.into();
    if wide.is_nan() {
        return put_numeric(dst, "NaN");
    }
    if wide.is_infinite() {
        return Err(EncodingErrorKind::InvalidValue {
            target: Type::Numeric,
            reason: "infinity".to_string(),
        });
    }
    // Float Display never uses exponent notation.
    put_numeric(dst, &f.to_string())
}

/// Writes a decimal string in NUMERIC's base-10000 binary form:
/// `ndigits i16, weight i16, sign u16, dscale u16, digits i16*`.
fn put_numeric(dst: &mut BytesMut, text: &str) -> Result<(), EncodingErrorKind> {
    let invalid = |reason: &str| EncodingErrorKind::InvalidValue {
        target: Type::Numeric,
        reason: reason.to_string(),
    };
    let overflow = || EncodingErrorKind::Overflow {
        target: Type::Numeric,
    };

    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        dst.put_i32(8);
        dst.put_i16(0);
        dst.put_i16(0);
        dst.put_u16(NUMERIC_NAN);
        dst.put_u16(0);
        return Ok(());
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !is_digits(int_part) || !is_digits(frac_part)
    {
        return Err(invalid("not a plain decimal number"));
    }
    if frac_part.len() > NUMERIC_DSCALE_MAX {
        return Err(overflow());
    }
    let dscale = frac_part.len() as u16;

    let int_part = int_part.trim_start_matches('0');
    let int_padded = format!("{}{}", "0".repeat((4 - int_part.len() % 4) % 4), int_part);
    let frac_padded = format!("{}{}", frac_part, "0".repeat((4 - frac_part.len() % 4) % 4));

    let group = |chunk: &[u8]| {
        chunk
            .iter()
            .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
    };
    let mut digits: Vec<i16> = int_padded.as_bytes().chunks(4).map(group).collect();
    let mut weight = digits.len() as i64 - 1;
    digits.extend(frac_padded.as_bytes().chunks(4).map(group));

    let leading = digits.iter().take_while(|&&d| d == 0).count();
    digits.drain(..leading);
    weight -= leading as i64;
    while digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        weight = 0;
    }

    let ndigits = i16::try_from(digits.len()).map_err(|_| overflow())?;
    let weight = i16::try_from(weight).map_err(|_| overflow())?;
    let sign = if negative && !digits.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    dst.put_i32(8 + 2 * i32::from(ndigits));
    dst.put_i16(ndigits);
    dst.put_i16(weight);
    dst.put_u16(sign);
    dst.put_u16(dscale);
    for digit in digits {
        dst.put_i16(digit);
    }
    Ok(())
}
