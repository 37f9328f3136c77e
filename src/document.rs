//! The sample document carried over the radio.
//!
//! A [`SampleDocument`] is a tree of [`Value`]s rooted at a map. The transport only
//! cares about a handful of reserved top-level keys:
//!
//! ```text
//! {
//!     "type": "data",
//!     "id": { "name": "Dend4", "instance": 1 },
//!     "timestamp": { "time_utc": "2022-11-30T06:48:21Z", "time_local": "2022-11-29T22:48:21Z" },
//!     "contents": [
//!         { "module": "SHT31", "data": { "Temperature": 21.35, "Humidity": 53.23 } }
//!     ]
//! }
//! ```
//!
//! `contents` keeps insertion order; when a document is too large for one packet, each
//! element becomes exactly one fragment body.
//!
//! Maps are ordered by key, so two documents compare equal regardless of the order their
//! keys were inserted in.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::consts::{
    KEY_CONTENTS, KEY_DATA, KEY_ID, KEY_INSTANCE, KEY_MODULE, KEY_NAME, KEY_TIME_LOCAL,
    KEY_TIME_UTC, KEY_TIMESTAMP, KEY_TYPE,
};
use crate::encoding;
use crate::error::{DocumentError, WireError};

/// An ordered map of document keys to values.
pub type Map = BTreeMap<String, Value>;

/// A node of the document tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent or explicitly empty value.
    #[default]
    Null,
    /// A boolean reading or flag.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point reading.
    Float(f64),
    /// A string.
    Str(String),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A keyed collection of values.
    Map(Map),
}

impl Value {
    /// Returns an empty map value.
    pub fn map() -> Self {
        Value::Map(Map::new())
    }

    /// Returns an empty array value.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    /// Looks up `key` if this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Mutable lookup of `key` if this value is a map.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.as_map_mut().and_then(|m| m.get_mut(key))
    }

    /// Whether this value is a map containing `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The integer payload, if any. Floats with no fractional part are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::Float(f) if f == (f as i64) as f64 => Some(f as i64),
            _ => None,
        }
    }

    /// The float payload, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    /// The boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// The array payload, if any.
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The mutable array payload, if any.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The map payload, if any.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The mutable map payload, if any.
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, u8, u16, u32);

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(String::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

/// The `{name, instance}` block identifying a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceId {
    /// Human readable device name.
    pub name: String,
    /// Instance number distinguishing devices sharing a name.
    pub instance: i64,
}

impl DeviceId {
    /// Creates a new identity.
    pub fn new(name: &str, instance: i64) -> Self {
        Self {
            name: String::from(name),
            instance,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            name: String::from(value.get(KEY_NAME)?.as_str()?),
            instance: value.get(KEY_INSTANCE)?.as_i64()?,
        })
    }

    fn to_value(&self) -> Value {
        let mut m = Map::new();
        let _ = m.insert(String::from(KEY_NAME), Value::from(self.name.as_str()));
        let _ = m.insert(String::from(KEY_INSTANCE), Value::Int(self.instance));
        Value::Map(m)
    }
}

/// The `{time_utc, time_local}` block stamping a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocTimestamp {
    /// UTC time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub time_utc: String,
    /// Local time in the same format.
    pub time_local: String,
}

impl DocTimestamp {
    /// Stamps `now` (seconds since the Unix epoch) in UTC and at `utc_offset_secs` local
    /// offset.
    pub fn from_unix(now: u32, utc_offset_secs: i32) -> Self {
        let utc = i64::from(now);
        Self {
            time_utc: calendar::iso8601(utc),
            time_local: calendar::iso8601(utc + i64::from(utc_offset_secs)),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            time_utc: String::from(value.get(KEY_TIME_UTC)?.as_str()?),
            time_local: String::from(value.get(KEY_TIME_LOCAL)?.as_str()?),
        })
    }

    fn to_value(&self) -> Value {
        let mut m = Map::new();
        let _ = m.insert(String::from(KEY_TIME_UTC), Value::from(self.time_utc.as_str()));
        let _ = m.insert(
            String::from(KEY_TIME_LOCAL),
            Value::from(self.time_local.as_str()),
        );
        Value::Map(m)
    }
}

/// The current sample: a map-rooted document tree.
///
/// The transport borrows it mutably for the duration of a single `send` or `receive`;
/// on a completed receive it is replaced wholesale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleDocument {
    root: Map,
}

impl SampleDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self { root: Map::new() }
    }

    /// Creates an empty `"data"`-style document of the given kind with an empty `contents`.
    pub fn with_kind(kind: &str, id: &DeviceId) -> Self {
        let mut doc = Self::new();
        doc.set_kind(kind);
        doc.set_id(id);
        let _ = doc.insert(KEY_CONTENTS, Value::array());
        doc
    }

    /// Builds the compact heartbeat document: kind, identity, optional timestamp and an
    /// empty `contents` array.
    pub fn heartbeat(kind: &str, id: &DeviceId, timestamp: Option<&DocTimestamp>) -> Self {
        let mut doc = Self::with_kind(kind, id);
        if let Some(ts) = timestamp {
            doc.set_timestamp(ts);
        }
        doc
    }

    /// Wraps a decoded value. Fails unless the root is a map.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Map(root) => Ok(Self { root }),
            _ => Err(DocumentError::NotAMap),
        }
    }

    /// Wraps a decoded map.
    pub fn from_map(root: Map) -> Self {
        Self { root }
    }

    /// Consumes the document into its root value.
    pub fn into_value(self) -> Value {
        Value::Map(self.root)
    }

    /// Borrows the root map.
    pub fn as_map(&self) -> &Map {
        &self.root
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.root.clear();
    }

    /// Whether the document has no keys.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Replaces the whole document with `other`.
    pub fn replace(&mut self, other: SampleDocument) {
        *self = other;
    }

    /// Looks up a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Whether a top-level key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    /// Inserts a top-level key, returning the previous value.
    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.root.insert(String::from(key), value)
    }

    /// Removes a top-level key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.root.remove(key)
    }

    /// The document kind (`type`).
    pub fn kind(&self) -> Option<&str> {
        self.get(KEY_TYPE).and_then(Value::as_str)
    }

    /// Sets the document kind.
    pub fn set_kind(&mut self, kind: &str) {
        let _ = self.insert(KEY_TYPE, Value::from(kind));
    }

    /// The `id` block, if present and well formed.
    pub fn id(&self) -> Option<DeviceId> {
        self.get(KEY_ID).and_then(DeviceId::from_value)
    }

    /// Sets the `id` block.
    pub fn set_id(&mut self, id: &DeviceId) {
        let _ = self.insert(KEY_ID, id.to_value());
    }

    /// The `timestamp` block, if present and well formed.
    pub fn timestamp(&self) -> Option<DocTimestamp> {
        self.get(KEY_TIMESTAMP).and_then(DocTimestamp::from_value)
    }

    /// Sets the `timestamp` block.
    pub fn set_timestamp(&mut self, ts: &DocTimestamp) {
        let _ = self.insert(KEY_TIMESTAMP, ts.to_value());
    }

    /// The `contents` array, if present.
    pub fn contents(&self) -> Option<&Vec<Value>> {
        self.get(KEY_CONTENTS).and_then(Value::as_array)
    }

    /// The `contents` array, created empty if missing or not an array.
    pub fn contents_mut(&mut self) -> &mut Vec<Value> {
        let slot = self
            .root
            .entry(String::from(KEY_CONTENTS))
            .or_insert_with(Value::array);
        ensure_array(slot)
    }

    /// Finds the data map of the block for `module`, appending `{module, data: {}}` to
    /// `contents` when none exists yet.
    pub fn data_block(&mut self, module: &str) -> &mut Map {
        let contents = self.contents_mut();
        let position = contents
            .iter()
            .position(|block| block.get(KEY_MODULE).and_then(Value::as_str) == Some(module));
        let index = match position {
            Some(i) => i,
            None => {
                let mut block = Map::new();
                let _ = block.insert(String::from(KEY_MODULE), Value::from(module));
                let _ = block.insert(String::from(KEY_DATA), Value::map());
                contents.push(Value::Map(block));
                contents.len() - 1
            }
        };
        let block = ensure_map(&mut contents[index]);
        let data = block
            .entry(String::from(KEY_DATA))
            .or_insert_with(Value::map);
        ensure_map(data)
    }

    /// Encodes the document as a single stored record (the wire encoding).
    pub fn to_record(&self) -> Result<Vec<u8>, WireError> {
        encoding::encode_map(&self.root)
    }

    /// Decodes a record produced by [`to_record`](Self::to_record).
    pub fn from_record(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            root: encoding::decode_map(bytes)?,
        })
    }
}

/// Replaces a non-array `slot` with an empty array.
fn ensure_array(slot: &mut Value) -> &mut Vec<Value> {
    match slot {
        Value::Array(a) => a,
        other => {
            *other = Value::array();
            ensure_array(other)
        }
    }
}

/// Replaces a non-map `slot` with an empty map.
fn ensure_map(slot: &mut Value) -> &mut Map {
    match slot {
        Value::Map(m) => m,
        other => {
            *other = Value::map();
            ensure_map(other)
        }
    }
}
