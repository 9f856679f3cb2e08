//! Dynamic state values.
//!
//! Everything that crosses the sync boundary is a [`Value`]. Typed state is
//! bridged in and out through serde with [`Value::from_serde`] and
//! [`Value::to_serde`].

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SyncError;

/// A dynamically typed state value.
///
/// Sets only hold strings and go over the wire as `{ element: true }`, so a
/// peer decodes them as maps.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Set(IndexSet<String>),
}

impl Value {
    /// Convert any serializable value.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T) -> Result<Self, SyncError> {
        Ok(serde_json::from_value(serde_json::to_value(value)?)?)
    }

    /// Convert back into a typed value.
    pub fn to_serde<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value is a list, map or set.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_) | Value::Set(_))
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
        }
    }

    /// Look up a map key or list index.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check that the value survives a round trip through the wire codecs.
    ///
    /// `path` names the value in the error, e.g. the selector name.
    pub fn validate(&self, path: &str) -> Result<(), SyncError> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(SyncError::InvalidValue {
                path: path.to_string(),
                reason: format!("non-finite float {f}"),
            }),
            Value::List(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| item.validate(&format!("{path}/{i}"))),
            Value::Map(map) => map
                .iter()
                .try_for_each(|(k, v)| v.validate(&format!("{path}/{k}"))),
            _ => Ok(()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Set(set) => {
                let mut out = serializer.serialize_map(Some(set.len()))?;
                for k in set {
                    out.serialize_entry(k, &true)?;
                }
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any state value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Value, E> {
        Ok(Value::Int(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Value, E> {
        Ok(i64::try_from(n)
            .map(Value::Int)
            .unwrap_or(Value::Float(n as f64)))
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            map.insert(k, v);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Int(n.into())
            }
        })*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<IndexMap<String, T>> for Value {
    fn from(map: IndexMap<String, T>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<IndexSet<String>> for Value {
    fn from(set: IndexSet<String>) -> Self {
        Value::Set(set)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Player {
        name: String,
        score: i64,
        tags: Vec<String>,
    }

    #[test]
    fn json_shapes() {
        let value: Value = [("a", Value::Int(1)), ("b", Value::Null)]
            .into_iter()
            .collect();
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"a":1,"b":null}"#);

        let set = Value::Set(["x".to_string()].into_iter().collect());
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"{"x":true}"#);
    }

    #[test]
    fn json_decoding_preserves_key_order() {
        let value: Value = serde_json::from_str(r#"{"z":1,"a":[true,2.5,"s"]}"#).unwrap();
        let map = value.as_map().unwrap();

        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(
            map["a"],
            Value::List(vec![Value::Bool(true), Value::Float(2.5), "s".into()])
        );
    }

    #[test]
    fn large_unsigned_numbers_become_floats() {
        let value: Value = serde_json::from_str("18446744073709551615").unwrap();
        assert!(matches!(value, Value::Float(_)));
    }

    #[test]
    fn serde_bridge_round_trips_structs() {
        let player = Player {
            name: "ann".to_string(),
            score: 12,
            tags: vec!["red".to_string()],
        };

        let value = Value::from_serde(&player).unwrap();
        assert_eq!(value.get("score"), Some(&Value::Int(12)));
        assert_eq!(value.to_serde::<Player>().unwrap(), player);
    }

    #[test]
    fn validate_rejects_non_finite_floats() {
        let value: Value = [("speed", Value::List(vec![Value::Float(f64::NAN)]))]
            .into_iter()
            .collect();

        let err = value.validate("car").unwrap_err();
        assert!(err.to_string().contains("car/speed/0"));
        assert!(Value::from(1.5).validate("ok").is_ok());
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(vec!["a", "b"]).as_list().map(<[Value]>::len), Some(2));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::Int(1).type_name(), "int");
    }
}
