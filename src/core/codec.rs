//! Type-directed value encoding.
//!
//! Scalars travel as their plain textual form. Composite values go through a
//! [`Codec`] and are stored as the resulting byte string. Which path a value
//! takes is decided by the method the caller picks (`set` vs `set_object`),
//! so nothing is inspected at runtime.

use crate::core::error::{CacheError, CacheResult};
use redis::{RedisWrite, ToRedisArgs};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Pluggable serializer for composite values.
pub trait Codec: Send + Sync + 'static {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;

    /// Codec name, used in log lines.
    fn name(&self) -> &str;
}

/// Default codec: JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Marshal(e.to_string()))
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Unmarshal(e.to_string()))
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// A value that is stored as-is, without going through the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    /// Wire form. Booleans go out as `1`/`0`.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Scalar::Str(s) => s.as_bytes().to_vec(),
            Scalar::Bool(true) => b"1".to_vec(),
            Scalar::Bool(false) => b"0".to_vec(),
            Scalar::Int(n) => n.to_string().into_bytes(),
            Scalar::UInt(n) => n.to_string().into_bytes(),
            Scalar::Float(f) => f.to_string().into_bytes(),
        }
    }
}

impl ToRedisArgs for Scalar {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(&self.to_wire());
    }
}

/// Boolean spellings accepted from stored values.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

pub(crate) fn decode_string(data: Vec<u8>) -> CacheResult<String> {
    String::from_utf8(data).map_err(|_| CacheError::type_mismatch("string", "non-utf8 bytes"))
}

pub(crate) fn decode_i64(data: &[u8]) -> CacheResult<i64> {
    let text = String::from_utf8_lossy(data);
    text.trim()
        .parse::<i64>()
        .map_err(|_| CacheError::type_mismatch("integer", text.into_owned()))
}

pub(crate) fn decode_f64(data: &[u8]) -> CacheResult<f64> {
    let text = String::from_utf8_lossy(data);
    text.trim()
        .parse::<f64>()
        .map_err(|_| CacheError::type_mismatch("float", text.into_owned()))
}

pub(crate) fn decode_bool(data: &[u8]) -> CacheResult<bool> {
    let text = String::from_utf8_lossy(data);
    parse_bool(&text).ok_or_else(|| CacheError::type_mismatch("bool", text.into_owned()))
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<&String> for Scalar {
    fn from(value: &String) -> Self {
        Scalar::Str(value.clone())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        // Go through the shortest decimal form so 0.1f32 stays "0.1".
        Scalar::Float(value.to_string().parse().unwrap_or(value as f64))
    }
}

macro_rules! scalar_from_signed {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(value: $t) -> Self {
                    Scalar::Int(value as i64)
                }
            }
        )*
    };
}

macro_rules! scalar_from_unsigned {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(value: $t) -> Self {
                    Scalar::UInt(value as u64)
                }
            }
        )*
    };
}

scalar_from_signed!(i8, i16, i32, i64, isize);
scalar_from_unsigned!(u8, u16, u32, u64, usize);

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Marshal failed: {0}")]
    Marshal(String),
    #[error("Unmarshal failed: {0}")]
    Unmarshal(String),
}
