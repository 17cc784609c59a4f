// ABOUTME: Lenient query-string binding into serde structs
// ABOUTME: Missing or malformed values become zero values; binding never fails
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Query binding.
//!
//! [`bind_query`] fills every field of the target struct from the query
//! string. Field names (after `#[serde(rename)]`) are the keys. Scalars take
//! the first value of their key, `Vec<_>` collects repeated keys and
//! `Option<_>` is `None` when the key is absent. A value that does not parse
//! leaves the zero value (`0`, `false`, `""`) in place. Targets that are not a
//! struct or map bind to `T::default()`.
//!
//! ```
//! use serde::Deserialize;
//! use txlog::server::bind_query;
//!
//! #[derive(Debug, Default, Deserialize)]
//! struct Filter {
//!     name: String,
//!     page: i32,
//!     #[serde(rename = "tag")]
//!     tags: Vec<String>,
//!     active: bool,
//! }
//!
//! let filter: Filter = bind_query("name=ana&page=x&tag=a&tag=b&active=on");
//! assert_eq!(filter.name, "ana");
//! assert_eq!(filter.page, 0);
//! assert_eq!(filter.tags, vec!["a", "b"]);
//! assert!(filter.active);
//! ```

use std::fmt;

use serde::de::value::StrDeserializer;
use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::forward_to_deserialize_any;
use tracing::debug;

/// Bind a raw query string (without the leading `?`) into `T`
#[must_use]
pub fn bind_query<T: DeserializeOwned + Default>(query: &str) -> T {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    bind_pairs(&pairs)
}

pub(crate) fn bind_pairs<T: DeserializeOwned + Default>(pairs: &[(String, String)]) -> T {
    T::deserialize(QueryDeserializer { pairs }).unwrap_or_else(|e| {
        debug!(error = %e, "query binding fell back to default value");
        T::default()
    })
}

#[derive(Debug)]
struct BindError(String);

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BindError {}

impl de::Error for BindError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

fn values_of<'a>(pairs: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    pairs
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

struct QueryDeserializer<'a> {
    pairs: &'a [(String, String)],
}

impl<'de> de::Deserializer<'de> for QueryDeserializer<'_> {
    type Error = BindError;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(de::Error::custom("query can only bind into a struct or map"))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_map(FieldAccess {
            pairs: self.pairs,
            fields: fields.iter(),
            pending: Vec::new(),
        })
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let mut keys: Vec<&str> = Vec::new();
        for (key, _) in self.pairs {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        visitor.visit_map(KeyAccess {
            pairs: self.pairs,
            keys: keys.into_iter(),
            pending: Vec::new(),
        })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct enum identifier ignored_any
    }
}

struct FieldAccess<'a> {
    pairs: &'a [(String, String)],
    fields: std::slice::Iter<'static, &'static str>,
    pending: Vec<&'a str>,
}

impl<'de> MapAccess<'de> for FieldAccess<'_> {
    type Error = BindError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        let Some(field) = self.fields.next() else {
            return Ok(None);
        };
        self.pending = values_of(self.pairs, field);
        let key: StrDeserializer<'_, BindError> = (*field).into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Self::Error> {
        seed.deserialize(ValuesDeserializer {
            values: std::mem::take(&mut self.pending),
        })
    }
}

struct KeyAccess<'a> {
    pairs: &'a [(String, String)],
    keys: std::vec::IntoIter<&'a str>,
    pending: Vec<&'a str>,
}

impl<'de> MapAccess<'de> for KeyAccess<'_> {
    type Error = BindError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        let Some(key) = self.keys.next() else {
            return Ok(None);
        };
        self.pending = values_of(self.pairs, key);
        let key: StrDeserializer<'_, BindError> = key.into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Self::Error> {
        seed.deserialize(ValuesDeserializer {
            values: std::mem::take(&mut self.pending),
        })
    }
}

/// Every value of one key
struct ValuesDeserializer<'a> {
    values: Vec<&'a str>,
}

impl<'a> ValuesDeserializer<'a> {
    fn scalar(&self) -> ScalarDeserializer<'a> {
        ScalarDeserializer(self.values.first().copied())
    }
}

macro_rules! delegate_scalar {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                self.scalar().$method(visitor)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for ValuesDeserializer<'_> {
    type Error = BindError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.values.first() {
            Some(value) => visitor.visit_str(value),
            None => visitor.visit_none(),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.values.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_seq(ValueSeq {
            values: self.values.into_iter(),
        })
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.scalar().deserialize_enum(name, variants, visitor)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    delegate_scalar! {
        deserialize_bool deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_i128 deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_u128 deserialize_f32 deserialize_f64 deserialize_char deserialize_str
        deserialize_string deserialize_identifier
    }

    forward_to_deserialize_any! {
        bytes byte_buf unit_struct tuple tuple_struct map struct
    }
}

struct ValueSeq<'a> {
    values: std::vec::IntoIter<&'a str>,
}

impl<'de> SeqAccess<'de> for ValueSeq<'_> {
    type Error = BindError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        self.values
            .next()
            .map(|value| seed.deserialize(ScalarDeserializer(Some(value))))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.values.len())
    }
}

/// One raw value, or none when the key was absent
struct ScalarDeserializer<'a>(Option<&'a str>);

macro_rules! parse_or_zero {
    ($($method:ident => $visit:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                visitor.$visit(self.0.and_then(|raw| raw.parse::<$ty>().ok()).unwrap_or_default())
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for ScalarDeserializer<'_> {
    type Error = BindError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_str(self.0.unwrap_or_default())
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let value = self
            .0
            .is_some_and(|raw| matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "on"));
        visitor.visit_bool(value)
    }

    parse_or_zero! {
        deserialize_i8 => visit_i8: i8,
        deserialize_i16 => visit_i16: i16,
        deserialize_i32 => visit_i32: i32,
        deserialize_i64 => visit_i64: i64,
        deserialize_i128 => visit_i128: i128,
        deserialize_u8 => visit_u8: u8,
        deserialize_u16 => visit_u16: u16,
        deserialize_u32 => visit_u32: u32,
        deserialize_u64 => visit_u64: u64,
        deserialize_u128 => visit_u128: u128,
        deserialize_f32 => visit_f32: f32,
        deserialize_f64 => visit_f64: f64,
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_char(self.0.and_then(|raw| raw.chars().next()).unwrap_or_default())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            Some(_) => visitor.visit_some(self),
            None => visitor.visit_none(),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        let Some(raw) = self.0 else {
            return Err(de::Error::custom(format!("missing value for enum {name}")));
        };
        let value: StrDeserializer<'_, BindError> = raw.into_deserializer();
        value.deserialize_enum(name, variants, visitor)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        str string bytes byte_buf unit_struct seq tuple tuple_struct map struct identifier
    }
}
