//! Wire format for sync payloads.
//!
//! ```text
//! {"type":"init","data":{"count":1}}
//! {"type":"patch","data":{"todos":{"b":{"__none":"__none"},"c":"z"}}}
//! ```
//!
//! Patches are plain values on the wire: a nested object is a merge, the
//! `{"__none":"__none"}` object is the tombstone, and anything else replaces
//! the value. Decoding therefore needs to know which list encoding the
//! sender used.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

use super::patch::{ListEncoding, Patch, State, StatePatch};
use super::value::Value;
use crate::error::SyncError;

/// Key and value of the tombstone object.
pub const NONE_MARKER: &str = "__none";

/// A message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SyncPayload {
    /// Full state, for hydration.
    Init(State),
    /// Changes since the previous payload.
    Patch(StatePatch),
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum WirePayload {
    Init(State),
    Patch(IndexMap<String, Value>),
}

impl SyncPayload {
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str, encoding: ListEncoding) -> Result<Self, SyncError> {
        let wire: WirePayload = serde_json::from_str(json)?;
        Ok(Self::from_wire(wire, encoding))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, SyncError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8], encoding: ListEncoding) -> Result<Self, SyncError> {
        let wire: WirePayload = rmp_serde::from_slice(bytes)?;
        Ok(Self::from_wire(wire, encoding))
    }

    fn from_wire(wire: WirePayload, encoding: ListEncoding) -> Self {
        match wire {
            WirePayload::Init(state) => SyncPayload::Init(state),
            WirePayload::Patch(data) => SyncPayload::Patch(
                data.into_iter()
                    .map(|(name, value)| (name, Patch::from_wire(value, encoding)))
                    .collect(),
            ),
        }
    }
}

fn is_tombstone(map: &IndexMap<String, Value>) -> bool {
    map.len() == 1 && map.get(NONE_MARKER).and_then(Value::as_str) == Some(NONE_MARKER)
}

impl Patch {
    /// Rebuild a patch from its wire value.
    ///
    /// A replaced map or set is indistinguishable from a merge on the wire
    /// and comes back as one.
    pub fn from_wire(value: Value, encoding: ListEncoding) -> Self {
        match value {
            Value::Map(map) if is_tombstone(&map) => Patch::Remove,
            Value::Map(map) => Patch::Merge(
                map.into_iter()
                    .map(|(key, value)| (key, Patch::from_wire(value, encoding)))
                    .collect(),
            ),
            Value::List(items) if encoding == ListEncoding::Sparse => Patch::Sparse(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Null => None,
                        item => Some(Patch::from_wire(item, encoding)),
                    })
                    .collect(),
            ),
            value => Patch::Replace(value),
        }
    }
}

struct Tombstone;

impl Serialize for Tombstone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(NONE_MARKER, NONE_MARKER)?;
        map.end()
    }
}

impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Patch::Remove => Tombstone.serialize(serializer),
            Patch::Replace(value) => value.serialize(serializer),
            Patch::Merge(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, patch) in entries {
                    map.serialize_entry(key, patch)?;
                }
                map.end()
            }
            Patch::Sparse(slots) => {
                let mut seq = serializer.serialize_seq(Some(slots.len()))?;
                for slot in slots {
                    seq.serialize_element(slot)?;
                }
                seq.end()
            }
        }
    }
}
