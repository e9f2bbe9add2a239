//! Column types, typed values and their fixed-width wire encodings.
//!
//! 64-bit integers are packed through explicit 32-bit hi/lo halves so the
//! two's-complement arithmetic is spelled out rather than left to the host.
//! Floats are produced in host pack order and byte-swapped only when the
//! host is little-endian, which yields the big-endian wire layout everywhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Wire type declared for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Int,
    BigInt,
    Counter,
    Timestamp,
    Float,
    Double,
    Varchar,
    Blob,
    Boolean,
    Uuid,
}

impl ColumnType {
    /// Resolve a declared type name, accepting the usual aliases.
    #[must_use]
    pub fn from_alias(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "int" | "smallint" | "integer" => Self::Int,
            "bigint" => Self::BigInt,
            "counter" => Self::Counter,
            "decimal" | "double" => Self::Double,
            "float" => Self::Float,
            "string" | "text" | "varchar" => Self::Varchar,
            "guid" | "uuid" => Self::Uuid,
            "binary" | "blob" => Self::Blob,
            "boolean" | "bool" => Self::Boolean,
            "date" | "datetime" | "datetimez" | "time" | "timestamp" => Self::Timestamp,
            _ => return None,
        };
        Some(ty)
    }

    /// Type name as written in CQL DDL.
    #[must_use]
    pub const fn cql_name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Counter => "counter",
            Self::Timestamp => "timestamp",
            Self::Float => "float",
            Self::Double => "double",
            Self::Varchar => "varchar",
            Self::Blob => "blob",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
        }
    }

    #[must_use]
    pub const fn is_counter(self) -> bool {
        matches!(self, Self::Counter)
    }

    /// Encoded width for fixed-width types.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Int | Self::Float => Some(4),
            Self::BigInt | Self::Counter | Self::Timestamp | Self::Double => Some(8),
            Self::Boolean => Some(1),
            Self::Uuid => Some(16),
            Self::Varchar | Self::Blob => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cql_name())
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_alias(&value).ok_or_else(|| format!("unknown column type '{value}'"))
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.cql_name().to_owned()
    }
}

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {expected} bytes for a {ty} column, got {actual}")]
    Width {
        ty: ColumnType,
        expected: usize,
        actual: usize,
    },

    #[error("cannot store a {value} value in a {ty} column")]
    TypeMismatch { ty: ColumnType, value: &'static str },

    #[error("{ty} column holds invalid data: {message}")]
    Malformed { ty: ColumnType, message: String },
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i32),
    BigInt(i64),
    Counter(i64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Uuid(Uuid),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Counter(_) => "counter",
            Self::Timestamp(_) => "timestamp",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Boolean(_) => "boolean",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Integer view of the integral variants.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v as i64),
            Self::BigInt(v) | Self::Counter(v) | Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ms) => DateTime::from_timestamp_millis(*ms),
            _ => None,
        }
    }

    /// Convert into the canonical variant for `ty`, widening where lossless.
    ///
    /// # Errors
    /// Returns `CodecError::TypeMismatch` when the value cannot be represented.
    pub fn coerce(self, ty: ColumnType) -> Result<Self, CodecError> {
        let mismatch = |v: &Self| CodecError::TypeMismatch { ty, value: v.kind() };
        let out = match (ty, self) {
            (_, Self::Null) => Self::Null,
            (ColumnType::Int, Self::Int(v)) => Self::Int(v),
            (ColumnType::Int, v @ (Self::BigInt(_) | Self::Counter(_) | Self::Timestamp(_))) => {
                let wide = v.as_i64().unwrap_or_default();
                Self::Int(i32::try_from(wide).map_err(|_| mismatch(&v))?)
            }
            (ColumnType::BigInt, v) => Self::BigInt(v.as_i64().ok_or_else(|| mismatch(&v))?),
            (ColumnType::Counter, v) => Self::Counter(v.as_i64().ok_or_else(|| mismatch(&v))?),
            (ColumnType::Timestamp, v) => Self::Timestamp(v.as_i64().ok_or_else(|| mismatch(&v))?),
            (ColumnType::Float, Self::Float(v)) => Self::Float(v),
            (ColumnType::Double, Self::Double(v)) => Self::Double(v),
            (ColumnType::Double, Self::Float(v)) => Self::Double(f64::from(v)),
            (ColumnType::Double, Self::Int(v)) => Self::Double(f64::from(v)),
            (ColumnType::Varchar, Self::Text(s)) => Self::Text(s),
            (ColumnType::Varchar, Self::Uuid(u)) => Self::Text(u.to_string()),
            (ColumnType::Blob, Self::Blob(b)) => Self::Blob(b),
            (ColumnType::Blob, Self::Text(s)) => Self::Blob(s.into_bytes()),
            (ColumnType::Boolean, Self::Boolean(b)) => Self::Boolean(b),
            (ColumnType::Uuid, Self::Uuid(u)) => Self::Uuid(u),
            (ColumnType::Uuid, Self::Text(s)) => {
                Self::Uuid(Uuid::parse_str(&s).map_err(|_| CodecError::TypeMismatch {
                    ty,
                    value: "text",
                })?)
            }
            (_, v) => return Err(mismatch(&v)),
        };
        Ok(out)
    }

    /// Parse text as a value of `ty`. Timestamps accept epoch milliseconds
    /// or RFC 3339; blobs accept hex with an optional `0x` prefix.
    ///
    /// # Errors
    /// Returns `CodecError::Malformed` when `text` does not parse.
    pub fn parse(ty: ColumnType, text: &str) -> Result<Self, CodecError> {
        let malformed = |message: String| CodecError::Malformed { ty, message };
        let t = text.trim();
        let value = match ty {
            ColumnType::Varchar => Self::Text(text.to_owned()),
            ColumnType::Int => Self::Int(t.parse().map_err(|e| malformed(format!("{e}")))?),
            ColumnType::BigInt => Self::BigInt(t.parse().map_err(|e| malformed(format!("{e}")))?),
            ColumnType::Counter => Self::Counter(t.parse().map_err(|e| malformed(format!("{e}")))?),
            ColumnType::Timestamp => match t.parse::<i64>() {
                Ok(ms) => Self::Timestamp(ms),
                Err(_) => Self::Timestamp(
                    DateTime::parse_from_rfc3339(t)
                        .map_err(|e| malformed(format!("{e}")))?
                        .timestamp_millis(),
                ),
            },
            ColumnType::Float => Self::Float(t.parse().map_err(|e| malformed(format!("{e}")))?),
            ColumnType::Double => Self::Double(t.parse().map_err(|e| malformed(format!("{e}")))?),
            ColumnType::Boolean => match t.to_ascii_lowercase().as_str() {
                "true" | "1" => Self::Boolean(true),
                "false" | "0" => Self::Boolean(false),
                other => return Err(malformed(format!("'{other}' is not a boolean"))),
            },
            ColumnType::Uuid => Self::Uuid(Uuid::parse_str(t).map_err(|e| malformed(format!("{e}")))?),
            ColumnType::Blob => Self::Blob(
                hex::decode(t.strip_prefix("0x").unwrap_or(t)).map_err(|e| malformed(format!("{e}")))?,
            ),
        };
        Ok(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) | Self::Counter(v) | Self::Timestamp(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v.timestamp_millis())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Byte order of the machine doing the packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// Pack a 32-bit integer as 4 big-endian bytes.
#[must_use]
pub const fn pack_i32(v: i32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Pack a 64-bit integer through hi/lo 32-bit halves.
///
/// Negative values take the magnitude, complement both halves and add one,
/// carrying into the high half when the low half is all ones.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // halves are masked to 32 bits first
pub const fn pack_i64(v: i64) -> [u8; 8] {
    let magnitude = v.unsigned_abs();
    let mut hi = (magnitude >> 32) as u32;
    let mut lo = (magnitude & 0xFFFF_FFFF) as u32;
    if v < 0 {
        hi = !hi;
        lo = !lo;
        if lo == u32::MAX {
            lo = 0;
            hi = hi.wrapping_add(1);
        } else {
            lo += 1;
        }
    }
    let h = hi.to_be_bytes();
    let l = lo.to_be_bytes();
    [h[0], h[1], h[2], h[3], l[0], l[1], l[2], l[3]]
}

/// Inverse of [`pack_i64`].
#[must_use]
#[allow(clippy::cast_possible_wrap)] // the magnitude is negated in u64 space
pub const fn unpack_i64(b: [u8; 8]) -> i64 {
    let mut hi = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    let mut lo = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
    if hi & 0x8000_0000 == 0 {
        return (((hi as u64) << 32) | lo as u64) as i64;
    }
    hi = !hi;
    lo = !lo;
    if lo == u32::MAX {
        lo = 0;
        hi = hi.wrapping_add(1);
    } else {
        lo += 1;
    }
    let magnitude = ((hi as u64) << 32) | lo as u64;
    0u64.wrapping_sub(magnitude) as i64
}

/// Pack a float for the wire as if running on a `host` machine.
#[must_use]
pub fn pack_f32_on(v: f32, host: Endian) -> [u8; 4] {
    let mut bytes = match host {
        Endian::Little => v.to_le_bytes(),
        Endian::Big => v.to_be_bytes(),
    };
    if host == Endian::Little {
        bytes.reverse();
    }
    bytes
}

#[must_use]
pub fn unpack_f32_on(mut bytes: [u8; 4], host: Endian) -> f32 {
    if host == Endian::Little {
        bytes.reverse();
        f32::from_le_bytes(bytes)
    } else {
        f32::from_be_bytes(bytes)
    }
}

#[must_use]
pub fn pack_f64_on(v: f64, host: Endian) -> [u8; 8] {
    let mut bytes = match host {
        Endian::Little => v.to_le_bytes(),
        Endian::Big => v.to_be_bytes(),
    };
    if host == Endian::Little {
        bytes.reverse();
    }
    bytes
}

#[must_use]
pub fn unpack_f64_on(mut bytes: [u8; 8], host: Endian) -> f64 {
    if host == Endian::Little {
        bytes.reverse();
        f64::from_le_bytes(bytes)
    } else {
        f64::from_be_bytes(bytes)
    }
}

/// Encode a value for a column of type `ty`. `Null` encodes as `None`.
///
/// # Errors
/// Returns `CodecError::TypeMismatch` when the value does not fit the column.
pub fn pack(value: &Value, ty: ColumnType) -> Result<Option<Vec<u8>>, CodecError> {
    let host = Endian::host();
    let bytes = match value.clone().coerce(ty)? {
        Value::Null => return Ok(None),
        Value::Int(v) => pack_i32(v).to_vec(),
        Value::BigInt(v) | Value::Counter(v) | Value::Timestamp(v) => pack_i64(v).to_vec(),
        Value::Float(v) => pack_f32_on(v, host).to_vec(),
        Value::Double(v) => pack_f64_on(v, host).to_vec(),
        Value::Text(s) => s.into_bytes(),
        Value::Blob(b) => b,
        Value::Boolean(b) => vec![u8::from(b)],
        Value::Uuid(u) => u.as_bytes().to_vec(),
    };
    Ok(Some(bytes))
}

fn exact<const N: usize>(bytes: &[u8], ty: ColumnType) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::Width {
        ty,
        expected: N,
        actual: bytes.len(),
    })
}

/// Decode the raw bytes of a `ty` column.
///
/// A missing cell decodes to `Null`. So does an empty cell of any
/// non-string type.
///
/// # Errors
/// Returns `CodecError::Width` for a wrong-sized fixed-width cell and
/// `CodecError::Malformed` for invalid UTF-8 text.
pub fn unpack(bytes: Option<&[u8]>, ty: ColumnType) -> Result<Value, CodecError> {
    let Some(bytes) = bytes else {
        return Ok(Value::Null);
    };
    let host = Endian::host();
    let value = match ty {
        ColumnType::Varchar => Value::Text(
            String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Malformed {
                ty,
                message: e.to_string(),
            })?,
        ),
        ColumnType::Blob => Value::Blob(bytes.to_vec()),
        _ if bytes.is_empty() => Value::Null,
        ColumnType::Int => Value::Int(i32::from_be_bytes(exact(bytes, ty)?)),
        ColumnType::BigInt => Value::BigInt(unpack_i64(exact(bytes, ty)?)),
        ColumnType::Counter => Value::Counter(unpack_i64(exact(bytes, ty)?)),
        ColumnType::Timestamp => Value::Timestamp(unpack_i64(exact(bytes, ty)?)),
        ColumnType::Float => Value::Float(unpack_f32_on(exact(bytes, ty)?, host)),
        ColumnType::Double => Value::Double(unpack_f64_on(exact(bytes, ty)?, host)),
        ColumnType::Boolean => Value::Boolean(exact::<1>(bytes, ty)?[0] != 0),
        ColumnType::Uuid => Value::Uuid(Uuid::from_bytes(exact(bytes, ty)?)),
    };
    Ok(value)
}
