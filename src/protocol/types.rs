//! CQL column types and their value codecs.
//!
//! Every [`CqlType`] converts between a native [`Value`] and the byte string
//! stored in a `[bytes]` cell. Collections use the v1/v2 layout: a 16-bit
//! element count followed by 16-bit length-prefixed elements.

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::buffer::ByteBuffer;
use super::error::{CodecError, CodecResult};
use super::numeric;

/// Type option codes as they appear in result metadata.
pub mod code {
    /// Custom type named by a class string
    pub const CUSTOM: u16 = 0x0000;
    /// `ascii`
    pub const ASCII: u16 = 0x0001;
    /// `bigint`
    pub const BIGINT: u16 = 0x0002;
    /// `blob`
    pub const BLOB: u16 = 0x0003;
    /// `boolean`
    pub const BOOLEAN: u16 = 0x0004;
    /// `counter`
    pub const COUNTER: u16 = 0x0005;
    /// `decimal`
    pub const DECIMAL: u16 = 0x0006;
    /// `double`
    pub const DOUBLE: u16 = 0x0007;
    /// `float`
    pub const FLOAT: u16 = 0x0008;
    /// `int`
    pub const INT: u16 = 0x0009;
    /// `text`
    pub const TEXT: u16 = 0x000A;
    /// `timestamp`
    pub const TIMESTAMP: u16 = 0x000B;
    /// `uuid`
    pub const UUID: u16 = 0x000C;
    /// `varchar`
    pub const VARCHAR: u16 = 0x000D;
    /// `varint`
    pub const VARINT: u16 = 0x000E;
    /// `timeuuid`
    pub const TIMEUUID: u16 = 0x000F;
    /// `inet`
    pub const INET: u16 = 0x0010;
    /// `list<T>`
    pub const LIST: u16 = 0x0020;
    /// `map<K, V>`
    pub const MAP: u16 = 0x0021;
    /// `set<T>`
    pub const SET: u16 = 0x0022;
}

/// Deepest collection nesting accepted in a type `[option]`.
pub const MAX_TYPE_DEPTH: usize = 32;

/// A CQL column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    /// Server-side custom type, carried as raw bytes
    Custom(String),
    /// US-ASCII string
    Ascii,
    /// 64-bit signed integer
    BigInt,
    /// Arbitrary bytes
    Blob,
    /// True or false
    Boolean,
    /// 64-bit counter column
    Counter,
    /// Arbitrary-precision decimal
    Decimal,
    /// 64-bit float
    Double,
    /// 32-bit float
    Float,
    /// 32-bit signed integer
    Int,
    /// UTF-8 string
    Text,
    /// Milliseconds since the epoch
    Timestamp,
    /// Any UUID
    Uuid,
    /// UTF-8 string
    Varchar,
    /// Arbitrary-precision integer
    Varint,
    /// Version 1 UUID
    Timeuuid,
    /// IPv4 or IPv6 address
    Inet,
    /// Ordered collection
    List(Box<CqlType>),
    /// Key-value collection
    Map(Box<CqlType>, Box<CqlType>),
    /// Unique-element collection
    Set(Box<CqlType>),
}

impl CqlType {
    /// The wire type code.
    pub fn code(&self) -> u16 {
        match self {
            CqlType::Custom(_) => code::CUSTOM,
            CqlType::Ascii => code::ASCII,
            CqlType::BigInt => code::BIGINT,
            CqlType::Blob => code::BLOB,
            CqlType::Boolean => code::BOOLEAN,
            CqlType::Counter => code::COUNTER,
            CqlType::Decimal => code::DECIMAL,
            CqlType::Double => code::DOUBLE,
            CqlType::Float => code::FLOAT,
            CqlType::Int => code::INT,
            CqlType::Text => code::TEXT,
            CqlType::Timestamp => code::TIMESTAMP,
            CqlType::Uuid => code::UUID,
            CqlType::Varchar => code::VARCHAR,
            CqlType::Varint => code::VARINT,
            CqlType::Timeuuid => code::TIMEUUID,
            CqlType::Inet => code::INET,
            CqlType::List(_) => code::LIST,
            CqlType::Map(_, _) => code::MAP,
            CqlType::Set(_) => code::SET,
        }
    }

    /// Look up a non-parameterized type by code.
    ///
    /// Collections need their element types; use [`CqlType::list`],
    /// [`CqlType::set`] or [`CqlType::map`] for those.
    pub fn from_code(type_code: u16) -> CodecResult<Self> {
        let ty = match type_code {
            code::ASCII => CqlType::Ascii,
            code::BIGINT => CqlType::BigInt,
            code::BLOB => CqlType::Blob,
            code::BOOLEAN => CqlType::Boolean,
            code::COUNTER => CqlType::Counter,
            code::DECIMAL => CqlType::Decimal,
            code::DOUBLE => CqlType::Double,
            code::FLOAT => CqlType::Float,
            code::INT => CqlType::Int,
            code::TEXT => CqlType::Text,
            code::TIMESTAMP => CqlType::Timestamp,
            code::UUID => CqlType::Uuid,
            code::VARCHAR => CqlType::Varchar,
            code::VARINT => CqlType::Varint,
            code::TIMEUUID => CqlType::Timeuuid,
            code::INET => CqlType::Inet,
            other => return Err(CodecError::UnknownType(format!("0x{:04X}", other))),
        };
        Ok(ty)
    }

    /// `list<element>` from an element type code.
    pub fn list(element: u16) -> CodecResult<Self> {
        Ok(CqlType::List(Box::new(Self::from_code(element)?)))
    }

    /// `set<element>` from an element type code.
    pub fn set(element: u16) -> CodecResult<Self> {
        Ok(CqlType::Set(Box::new(Self::from_code(element)?)))
    }

    /// `map<key, value>` from key and value type codes.
    pub fn map(key: u16, value: u16) -> CodecResult<Self> {
        Ok(CqlType::Map(
            Box::new(Self::from_code(key)?),
            Box::new(Self::from_code(value)?),
        ))
    }

    /// Look up a type by CQL name, including `list<..>`, `set<..>` and `map<.., ..>`.
    pub fn from_name(name: &str) -> CodecResult<Self> {
        let name = name.trim();
        let lower = name.to_ascii_lowercase();

        if let Some(inner) = generic_args(&lower, "list") {
            return Ok(CqlType::List(Box::new(Self::from_name(inner)?)));
        }
        if let Some(inner) = generic_args(&lower, "set") {
            return Ok(CqlType::Set(Box::new(Self::from_name(inner)?)));
        }
        if let Some(inner) = generic_args(&lower, "map") {
            let (key, value) = split_top_level(inner)
                .ok_or_else(|| CodecError::UnknownType(name.to_string()))?;
            return Ok(CqlType::Map(
                Box::new(Self::from_name(key)?),
                Box::new(Self::from_name(value)?),
            ));
        }

        let ty = match lower.as_str() {
            "ascii" => CqlType::Ascii,
            "bigint" => CqlType::BigInt,
            "blob" => CqlType::Blob,
            "boolean" => CqlType::Boolean,
            "counter" => CqlType::Counter,
            "decimal" => CqlType::Decimal,
            "double" => CqlType::Double,
            "float" => CqlType::Float,
            "int" => CqlType::Int,
            "text" => CqlType::Text,
            "timestamp" => CqlType::Timestamp,
            "uuid" => CqlType::Uuid,
            "varchar" => CqlType::Varchar,
            "varint" => CqlType::Varint,
            "timeuuid" => CqlType::Timeuuid,
            "inet" => CqlType::Inet,
            _ => return Err(CodecError::UnknownType(name.to_string())),
        };
        Ok(ty)
    }

    /// Read a type `[option]` (code plus nested options) from metadata.
    ///
    /// Collections may nest at most [`MAX_TYPE_DEPTH`] levels.
    pub fn read_option(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Self::read_option_nested(buf, 0)
    }

    fn read_option_nested(buf: &mut ByteBuffer, depth: usize) -> CodecResult<Self> {
        let type_code = buf.read_u16()?;
        let nested = |buf: &mut ByteBuffer| {
            if depth >= MAX_TYPE_DEPTH {
                return Err(CodecError::InvalidValue(format!(
                    "type nesting deeper than {}",
                    MAX_TYPE_DEPTH
                )));
            }
            Self::read_option_nested(buf, depth + 1).map(Box::new)
        };
        match type_code {
            code::CUSTOM => Ok(CqlType::Custom(buf.read_string()?)),
            code::LIST => Ok(CqlType::List(nested(buf)?)),
            code::SET => Ok(CqlType::Set(nested(buf)?)),
            code::MAP => {
                let key = nested(buf)?;
                let value = nested(buf)?;
                Ok(CqlType::Map(key, value))
            }
            other => Self::from_code(other),
        }
    }

    /// Write this type as an `[option]`.
    pub fn write_option(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_u16(self.code());
        match self {
            CqlType::Custom(class) => buf.write_string(class)?,
            CqlType::List(element) | CqlType::Set(element) => element.write_option(buf)?,
            CqlType::Map(key, value) => {
                key.write_option(buf)?;
                value.write_option(buf)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Serialize a value into a cell; `Value::Null` becomes a null cell.
    pub fn serialize(&self, value: &Value) -> CodecResult<Option<Bytes>> {
        if value.is_null() {
            return Ok(None);
        }
        self.serialize_non_null(value).map(|bytes| Some(Bytes::from(bytes)))
    }

    fn serialize_non_null(&self, value: &Value) -> CodecResult<Vec<u8>> {
        let mismatch = || CodecError::InvalidValue(format!("cannot write {} as {}", value.kind(), self));

        match self {
            CqlType::Custom(_) | CqlType::Blob => match value {
                Value::Blob(bytes) => Ok(bytes.clone()),
                _ => Err(mismatch()),
            },
            CqlType::Ascii => match value {
                Value::Text(s) if s.is_ascii() => Ok(s.as_bytes().to_vec()),
                Value::Text(_) => Err(CodecError::InvalidValue("non-ASCII text for ascii column".to_string())),
                _ => Err(mismatch()),
            },
            CqlType::Text | CqlType::Varchar => match value {
                Value::Text(s) => Ok(s.as_bytes().to_vec()),
                _ => Err(mismatch()),
            },
            CqlType::Boolean => match value {
                Value::Boolean(b) => Ok(vec![u8::from(*b)]),
                Value::Int(i) => Ok(vec![u8::from(*i != 0)]),
                Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(vec![1]),
                    "false" | "0" => Ok(vec![0]),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            CqlType::BigInt | CqlType::Counter => {
                let long = match value {
                    Value::BigInt(v) => *v,
                    Value::Int(v) => i64::from(*v),
                    Value::Varint(s) | Value::Text(s) => numeric::long_from_decimal(s)?,
                    _ => return Err(mismatch()),
                };
                Ok(long.to_be_bytes().to_vec())
            }
            CqlType::Varint => match value {
                Value::Varint(s) | Value::Text(s) => {
                    Ok(numeric::varint_to_bytes(&numeric::parse_integer(s)?))
                }
                Value::BigInt(v) => Ok(numeric::varint_to_bytes(&(*v).into())),
                Value::Int(v) => Ok(numeric::varint_to_bytes(&(*v).into())),
                _ => Err(mismatch()),
            },
            CqlType::Decimal => match value {
                Value::Decimal(s) | Value::Text(s) => numeric::encode_decimal(s),
                Value::Int(v) => numeric::encode_decimal(&v.to_string()),
                Value::BigInt(v) => numeric::encode_decimal(&v.to_string()),
                _ => Err(mismatch()),
            },
            CqlType::Double => match value {
                Value::Double(v) => Ok(v.to_be_bytes().to_vec()),
                Value::Float(v) => Ok(f64::from(*v).to_be_bytes().to_vec()),
                Value::Int(v) => Ok(f64::from(*v).to_be_bytes().to_vec()),
                _ => Err(mismatch()),
            },
            CqlType::Float => match value {
                Value::Float(v) => Ok(v.to_be_bytes().to_vec()),
                Value::Double(v) => Ok((*v as f32).to_be_bytes().to_vec()),
                _ => Err(mismatch()),
            },
            CqlType::Int => {
                let int = match value {
                    Value::Int(v) => *v,
                    Value::BigInt(v) => i32::try_from(*v)
                        .map_err(|_| CodecError::Overflow(format!("{} does not fit int", v)))?,
                    Value::Text(s) => s
                        .trim()
                        .parse::<i32>()
                        .map_err(|_| CodecError::InvalidValue(format!("'{}' is not an int", s)))?,
                    _ => return Err(mismatch()),
                };
                Ok(int.to_be_bytes().to_vec())
            }
            CqlType::Timestamp => match value {
                Value::Timestamp(ts) => Ok(ts.timestamp_millis().to_be_bytes().to_vec()),
                Value::BigInt(millis) => Ok(millis.to_be_bytes().to_vec()),
                Value::Text(s) => {
                    let ts = DateTime::parse_from_rfc3339(s.trim())
                        .map_err(|_| CodecError::InvalidValue(format!("'{}' is not a timestamp", s)))?;
                    Ok(ts.timestamp_millis().to_be_bytes().to_vec())
                }
                _ => Err(mismatch()),
            },
            CqlType::Uuid | CqlType::Timeuuid => match value {
                Value::Uuid(id) => Ok(id.as_bytes().to_vec()),
                Value::Text(s) => Uuid::parse_str(s.trim())
                    .map(|id| id.as_bytes().to_vec())
                    .map_err(|_| CodecError::InvalidValue(format!("'{}' is not a uuid", s))),
                _ => Err(mismatch()),
            },
            CqlType::Inet => {
                let ip = match value {
                    Value::Inet(ip) => *ip,
                    Value::Text(s) => s
                        .trim()
                        .parse::<IpAddr>()
                        .map_err(|_| CodecError::InvalidValue(format!("'{}' is not an address", s)))?,
                    _ => return Err(mismatch()),
                };
                Ok(match ip {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                })
            }
            CqlType::List(element) | CqlType::Set(element) => {
                let items = match value {
                    Value::List(items) | Value::Set(items) => items,
                    _ => return Err(mismatch()),
                };
                let mut buf = ByteBuffer::with_step(256);
                buf.write_count(items.len())?;
                for item in items {
                    write_element(&mut buf, element, item)?;
                }
                Ok(buf.into_bytes().to_vec())
            }
            CqlType::Map(key_type, value_type) => {
                let entries = match value {
                    Value::Map(entries) => entries,
                    _ => return Err(mismatch()),
                };
                let mut buf = ByteBuffer::with_step(256);
                buf.write_count(entries.len())?;
                for (key, val) in entries {
                    write_element(&mut buf, key_type, key)?;
                    write_element(&mut buf, value_type, val)?;
                }
                Ok(buf.into_bytes().to_vec())
            }
        }
    }

    /// Deserialize a cell.
    ///
    /// A null cell is `Value::Null`, except for `boolean` where it reads as
    /// `false`.
    pub fn deserialize(&self, bytes: Option<&[u8]>) -> CodecResult<Value> {
        let bytes = match bytes {
            Some(bytes) => bytes,
            None if *self == CqlType::Boolean => return Ok(Value::Boolean(false)),
            None => return Ok(Value::Null),
        };

        let value = match self {
            CqlType::Custom(_) | CqlType::Blob => Value::Blob(bytes.to_vec()),
            CqlType::Ascii | CqlType::Text | CqlType::Varchar => Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|_| CodecError::InvalidUtf8)?
                    .to_string(),
            ),
            CqlType::Boolean => Value::Boolean(bytes.first().is_some_and(|b| *b != 0)),
            CqlType::BigInt | CqlType::Counter => Value::BigInt(i64::from_be_bytes(fixed(bytes, self)?)),
            CqlType::Varint => Value::Varint(numeric::varint_from_bytes(bytes).to_string()),
            CqlType::Decimal => Value::Decimal(numeric::decode_decimal(bytes)?),
            CqlType::Double => Value::Double(f64::from_be_bytes(fixed(bytes, self)?)),
            CqlType::Float => Value::Float(f32::from_be_bytes(fixed(bytes, self)?)),
            CqlType::Int => Value::Int(i32::from_be_bytes(fixed(bytes, self)?)),
            CqlType::Timestamp => {
                let millis = i64::from_be_bytes(fixed(bytes, self)?);
                let ts = DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| CodecError::Overflow(format!("timestamp {} out of range", millis)))?;
                Value::Timestamp(ts)
            }
            CqlType::Uuid | CqlType::Timeuuid => Value::Uuid(Uuid::from_bytes(fixed(bytes, self)?)),
            CqlType::Inet => match bytes.len() {
                4 => Value::Inet(IpAddr::from(fixed::<4>(bytes, self)?)),
                16 => Value::Inet(IpAddr::from(fixed::<16>(bytes, self)?)),
                n => return Err(CodecError::InvalidValue(format!("inet of {} bytes", n))),
            },
            CqlType::List(element) => Value::List(read_elements(bytes, element)?),
            CqlType::Set(element) => Value::Set(read_elements(bytes, element)?),
            CqlType::Map(key_type, value_type) => {
                let mut buf = ByteBuffer::from_bytes(bytes.to_vec());
                let count = buf.read_u16()? as usize;
                let mut entries = Vec::with_capacity(count.min(buf.remaining() / 4 + 1));
                for _ in 0..count {
                    let key = read_element(&mut buf, key_type)?;
                    let value = read_element(&mut buf, value_type)?;
                    entries.push((key, value));
                }
                Value::Map(entries)
            }
        };
        Ok(value)
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Custom(class) => write!(f, "'{}'", class),
            CqlType::Ascii => write!(f, "ascii"),
            CqlType::BigInt => write!(f, "bigint"),
            CqlType::Blob => write!(f, "blob"),
            CqlType::Boolean => write!(f, "boolean"),
            CqlType::Counter => write!(f, "counter"),
            CqlType::Decimal => write!(f, "decimal"),
            CqlType::Double => write!(f, "double"),
            CqlType::Float => write!(f, "float"),
            CqlType::Int => write!(f, "int"),
            CqlType::Text => write!(f, "text"),
            CqlType::Timestamp => write!(f, "timestamp"),
            CqlType::Uuid => write!(f, "uuid"),
            CqlType::Varchar => write!(f, "varchar"),
            CqlType::Varint => write!(f, "varint"),
            CqlType::Timeuuid => write!(f, "timeuuid"),
            CqlType::Inet => write!(f, "inet"),
            CqlType::List(e) => write!(f, "list<{}>", e),
            CqlType::Set(e) => write!(f, "set<{}>", e),
            CqlType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8], ty: &CqlType) -> CodecResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
        CodecError::InvalidValue(format!("{} needs {} bytes, got {}", ty, N, bytes.len()))
    })
}

fn generic_args<'a>(name: &'a str, outer: &str) -> Option<&'a str> {
    name.strip_prefix(outer)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

fn split_top_level(args: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((&args[..i], &args[i + 1..])),
            _ => {}
        }
    }
    None
}

fn write_element(buf: &mut ByteBuffer, ty: &CqlType, value: &Value) -> CodecResult<()> {
    let bytes = ty
        .serialize(value)?
        .ok_or_else(|| CodecError::InvalidValue("collections cannot hold null".to_string()))?;
    buf.write_short_bytes(&bytes)
}

fn read_element(buf: &mut ByteBuffer, ty: &CqlType) -> CodecResult<Value> {
    let len = buf.read_u16()? as usize;
    let raw = buf.read_raw(len)?;
    ty.deserialize(Some(raw))
}

fn read_elements(bytes: &[u8], element: &CqlType) -> CodecResult<Vec<Value>> {
    let mut buf = ByteBuffer::from_bytes(bytes.to_vec());
    let count = buf.read_u16()? as usize;
    let mut items = Vec::with_capacity(count.min(buf.remaining() / 2 + 1));
    for _ in 0..count {
        items.push(read_element(&mut buf, element)?);
    }
    Ok(items)
}

// ============================================================================
// Value
// ============================================================================

/// A native CQL value.
///
/// 64-bit integers are `i64`; arbitrary-precision integers and decimals are
/// kept as their base-10 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// boolean
    Boolean(bool),
    /// int
    Int(i32),
    /// bigint, counter
    BigInt(i64),
    /// double
    Double(f64),
    /// float
    Float(f32),
    /// ascii, text, varchar
    Text(String),
    /// blob and custom types
    Blob(Vec<u8>),
    /// varint, as a base-10 string
    Varint(String),
    /// decimal, as a fixed-point string
    Decimal(String),
    /// timestamp
    Timestamp(DateTime<Utc>),
    /// uuid, timeuuid
    Uuid(Uuid),
    /// inet
    Inet(IpAddr),
    /// list
    List(Vec<Value>),
    /// set
    Set(Vec<Value>),
    /// map, in wire order
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// True for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Varint(_) => "varint",
            Value::Decimal(_) => "decimal",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Inet(_) => "inet",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// String content of text, varint and decimal values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Varint(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content of int and bigint values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<IpAddr> for Value {
    fn from(v: IpAddr) -> Self {
        Value::Inet(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ty: &CqlType, value: Value) -> Value {
        let bytes = ty.serialize(&value).unwrap();
        ty.deserialize(bytes.as_deref()).unwrap()
    }

    #[test]
    fn test_lookup_by_name_and_code() {
        assert_eq!(CqlType::from_name("int").unwrap(), CqlType::Int);
        assert_eq!(CqlType::from_name("VARCHAR").unwrap(), CqlType::Varchar);
        assert_eq!(CqlType::from_code(0x000B).unwrap(), CqlType::Timestamp);
        assert_eq!(
            CqlType::from_name("map<text, list<int>>").unwrap(),
            CqlType::Map(
                Box::new(CqlType::Text),
                Box::new(CqlType::List(Box::new(CqlType::Int)))
            )
        );
        assert_eq!(CqlType::set(code::UUID).unwrap(), CqlType::Set(Box::new(CqlType::Uuid)));
        assert!(CqlType::from_name("tuple<int>").is_err());
        assert!(CqlType::from_code(0x0030).is_err());
    }

    #[test]
    fn test_option_nesting() {
        let ty = CqlType::Map(
            Box::new(CqlType::Custom("org.example.T".to_string())),
            Box::new(CqlType::Set(Box::new(CqlType::Inet))),
        );
        let mut buf = ByteBuffer::new();
        ty.write_option(&mut buf).unwrap();
        buf.rewind();
        assert_eq!(CqlType::read_option(&mut buf).unwrap(), ty);
    }

    #[test]
    fn test_option_nesting_is_bounded() {
        let nested = |levels: usize| {
            let mut buf = ByteBuffer::new();
            for _ in 0..levels {
                buf.write_u16(code::LIST);
            }
            buf.write_u16(code::INT);
            buf.rewind();
            buf
        };

        let ty = CqlType::read_option(&mut nested(MAX_TYPE_DEPTH)).unwrap();
        assert_eq!(ty.to_string().matches("list<").count(), MAX_TYPE_DEPTH);

        assert!(matches!(
            CqlType::read_option(&mut nested(MAX_TYPE_DEPTH + 1)),
            Err(CodecError::InvalidValue(_))
        ));

        // a million levels fail without exhausting the stack
        assert!(CqlType::read_option(&mut nested(1_000_000)).is_err());
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(round_trip(&CqlType::Int, Value::Int(-5)), Value::Int(-5));
        assert_eq!(round_trip(&CqlType::Double, Value::Double(1.25)), Value::Double(1.25));
        assert_eq!(round_trip(&CqlType::Float, Value::Float(0.5)), Value::Float(0.5));
        assert_eq!(round_trip(&CqlType::Text, "héllo".into()), "héllo".into());
        assert_eq!(round_trip(&CqlType::Blob, Value::Blob(vec![0, 1])), Value::Blob(vec![0, 1]));
        assert_eq!(round_trip(&CqlType::Boolean, true.into()), Value::Boolean(true));
        assert_eq!(
            round_trip(&CqlType::Inet, Value::Inet("fe80::1".parse().unwrap())),
            Value::Inet("fe80::1".parse().unwrap())
        );
    }

    #[test]
    fn test_bigint_decimal_strings() {
        for text in ["-9223372036854775808", "9223372036854775807", "0", "-1"] {
            let bytes = CqlType::BigInt.serialize(&Value::Text(text.into())).unwrap().unwrap();
            assert_eq!(bytes.len(), 8);
            let value = CqlType::BigInt.deserialize(Some(&bytes)).unwrap();
            assert_eq!(value.as_i64().unwrap().to_string(), text);
        }

        let err = CqlType::Counter
            .serialize(&Value::Varint("9223372036854775808".into()))
            .unwrap_err();
        assert!(matches!(err, CodecError::Overflow(_)));
    }

    #[test]
    fn test_varint_and_decimal() {
        let big = Value::Varint("-123456789012345678901234567890".into());
        assert_eq!(round_trip(&CqlType::Varint, big.clone()), big);

        let dec = Value::Decimal("-0.000123".into());
        assert_eq!(round_trip(&CqlType::Decimal, dec.clone()), dec);
    }

    #[test]
    fn test_timestamp_millis() {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_380_000_000_123).unwrap();
        let bytes = CqlType::Timestamp.serialize(&ts.into()).unwrap().unwrap();
        assert_eq!(&bytes[..], &1_380_000_000_123i64.to_be_bytes());
        assert_eq!(CqlType::Timestamp.deserialize(Some(&bytes)).unwrap(), Value::Timestamp(ts));
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(CqlType::Int.serialize(&Value::Null).unwrap(), None);
        assert_eq!(CqlType::Text.deserialize(None).unwrap(), Value::Null);
        assert_eq!(CqlType::Boolean.deserialize(None).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_wrong_length_fails() {
        assert!(CqlType::Int.deserialize(Some(&[0, 1])).is_err());
        assert!(CqlType::Double.deserialize(Some(&[0; 4])).is_err());
        assert!(CqlType::Uuid.deserialize(Some(&[0; 15])).is_err());
        assert!(CqlType::Inet.deserialize(Some(&[0; 5])).is_err());
    }

    #[test]
    fn test_type_mismatch_fails() {
        assert!(CqlType::Int.serialize(&Value::Boolean(true)).is_err());
        assert!(CqlType::Ascii.serialize(&"héllo".into()).is_err());
        assert!(CqlType::Inet.serialize(&"foo".into()).is_err());
        assert!(CqlType::Int.serialize(&Value::BigInt(i64::MAX)).is_err());
    }

    #[test]
    fn test_collections() {
        let list = CqlType::List(Box::new(CqlType::Text));
        let value = Value::List(vec!["a".into(), "bc".into()]);
        let bytes = list.serialize(&value).unwrap().unwrap();
        assert_eq!(&bytes[..], &[0, 2, 0, 1, b'a', 0, 2, b'b', b'c']);
        assert_eq!(list.deserialize(Some(&bytes)).unwrap(), value);

        let map = CqlType::Map(Box::new(CqlType::Text), Box::new(CqlType::Int));
        let value = Value::Map(vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))]);
        assert_eq!(round_trip(&map, value.clone()), value);

        let set = CqlType::Set(Box::new(CqlType::Int));
        assert!(set.serialize(&Value::Set(vec![Value::Null])).is_err());
    }

    #[test]
    fn test_value_serde() {
        let json = serde_json::to_string(&Value::List(vec![Value::Int(1), Value::Null])).unwrap();
        assert_eq!(json, "[1,null]");
    }
}
