//! Mapping between structs and hash field/value pairs.
//!
//! Writing flattens a struct into one `(field, value)` pair per attribute:
//! strings, numbers and booleans are stored in their scalar form, nested
//! composites through the client's [`Codec`]. Reading goes the other way
//! through a small serde deserializer that parses each stored value into
//! whatever type the target attribute declares. Fields the target does not know are ignored, and
//! attributes with no stored field keep their `#[serde(default)]` value.

use crate::core::codec::{parse_bool, Codec, Scalar};
use crate::core::error::{CacheError, CacheResult};
use serde::de::value::{Error as DeError, MapDeserializer};
use serde::de::{self, DeserializeOwned, Deserializer as _, IntoDeserializer, Visitor};
use serde::{forward_to_deserialize_any, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Flatten `value` into hash fields. `None` attributes are skipped.
pub fn flatten_fields<T, C>(value: &T, codec: &C) -> CacheResult<Vec<(String, Vec<u8>)>>
where
    T: Serialize + ?Sized,
    C: Codec,
{
    let json = serde_json::to_value(value).map_err(|e| CacheError::Encode(e.to_string()))?;
    let object = match json {
        Value::Object(object) => object,
        other => {
            return Err(CacheError::Encode(format!(
                "hash value must serialize to a set of named fields, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut fields = Vec::with_capacity(object.len());
    for (name, value) in object {
        let encoded = match value {
            Value::Null => continue,
            Value::String(s) => s.into_bytes(),
            Value::Bool(b) => Scalar::Bool(b).to_wire(),
            Value::Number(n) => n.to_string().into_bytes(),
            nested => codec.marshal(&nested)?,
        };
        fields.push((name, encoded));
    }

    if fields.is_empty() {
        return Err(CacheError::Encode("hash value has no fields to store".to_string()));
    }
    Ok(fields)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Split an alternating field/value reply into pairs.
pub fn field_pairs(items: Vec<Vec<u8>>) -> CacheResult<Vec<(String, Vec<u8>)>> {
    if items.len() % 2 != 0 {
        return Err(CacheError::MalformedReply(format!(
            "expected field/value pairs, got {} elements",
            items.len()
        )));
    }

    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        let field = String::from_utf8(field)
            .map_err(|_| CacheError::MalformedReply("field name is not valid UTF-8".to_string()))?;
        pairs.push((field, value));
    }
    Ok(pairs)
}

/// Populate `T` from field/value pairs, matching fields to attribute names.
pub fn from_field_pairs<T, C>(pairs: Vec<(String, Vec<u8>)>, codec: &C) -> CacheResult<T>
where
    T: DeserializeOwned,
    C: Codec,
{
    let entries = pairs
        .into_iter()
        .map(|(field, data)| (field, FieldValue { data, codec }));
    let deserializer = MapDeserializer::<_, DeError>::new(entries);
    T::deserialize(deserializer).map_err(|e| CacheError::Decode(e.to_string()))
}

/// One stored field value, parsed on demand into the requested type.
struct FieldValue<'c, C> {
    data: Vec<u8>,
    codec: &'c C,
}

impl<C: Codec> FieldValue<'_, C> {
    fn text(&self) -> Result<&str, DeError> {
        std::str::from_utf8(&self.data)
            .map_err(|_| de::Error::custom("field value is not valid UTF-8"))
    }

    fn parse<T: FromStr>(&self, expected: &'static str) -> Result<T, DeError> {
        let text = self.text()?;
        text.trim().parse::<T>().map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(text), &expected)
        })
    }

    /// Decode a nested composite with the codec it was stored with.
    fn nested(&self) -> Result<Value, DeError> {
        self.codec.unmarshal(&self.data).map_err(de::Error::custom)
    }
}

impl<'de, C: Codec> IntoDeserializer<'de, DeError> for FieldValue<'_, C> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! deserialize_parsed {
    ($($method:ident => $visit:ident : $t:ty),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
                visitor.$visit(self.parse::<$t>(stringify!($t))?)
            }
        )*
    };
}

impl<'de, C: Codec> de::Deserializer<'de> for FieldValue<'_, C> {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match String::from_utf8(self.data) {
            Ok(text) => visitor.visit_string(text),
            Err(e) => visitor.visit_byte_buf(e.into_bytes()),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let text = self.text()?;
        match parse_bool(text) {
            Some(b) => visitor.visit_bool(b),
            None => Err(de::Error::invalid_value(de::Unexpected::Str(text), &"a boolean")),
        }
    }

    deserialize_parsed! {
        deserialize_i8 => visit_i8: i8,
        deserialize_i16 => visit_i16: i16,
        deserialize_i32 => visit_i32: i32,
        deserialize_i64 => visit_i64: i64,
        deserialize_u8 => visit_u8: u8,
        deserialize_u16 => visit_u16: u16,
        deserialize_u32 => visit_u32: u32,
        deserialize_u64 => visit_u64: u64,
        deserialize_f32 => visit_f32: f32,
        deserialize_f64 => visit_f64: f64,
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.nested()?.deserialize_seq(visitor).map_err(de::Error::custom)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, DeError> {
        self.nested()?
            .deserialize_tuple(len, visitor)
            .map_err(de::Error::custom)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.nested()?
            .deserialize_tuple_struct(name, len, visitor)
            .map_err(de::Error::custom)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.nested()?.deserialize_map(visitor).map_err(de::Error::custom)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.nested()?
            .deserialize_struct(name, fields, visitor)
            .map_err(de::Error::custom)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        // Unit variants are stored as their bare name, others through the codec
        match self.nested() {
            Ok(nested @ Value::Object(_)) => nested
                .deserialize_enum(name, variants, visitor)
                .map_err(de::Error::custom),
            _ => {
                let variant: String = self.text()?.to_string();
                visitor.visit_enum(variant.into_deserializer())
            }
        }
    }

    forward_to_deserialize_any! {
        char str string bytes byte_buf unit unit_struct identifier ignored_any
    }
}
