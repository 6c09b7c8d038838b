//! Typed field values.
//!
//! In memory a [`Value`] is a field id plus a [`ValueData`] sum type, so a
//! value can never carry a payload of the wrong type. On the wire it is a flat
//! message with an explicit `type` and one optional payload per type; the
//! conversion between the two rejects any mismatch.

use crate::error::CodecError;
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a field or value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    /// Unset.
    #[default]
    Unknown,
    /// 64-bit float.
    Double,
    /// Signed 64-bit integer.
    Int64,
    /// UTF-8 string.
    String,
    /// Seconds + nanos timestamp.
    Timestamp,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Bytes,
    /// Reference to another entity (may be nil).
    Key,
    /// Unsigned 64-bit integer.
    Uint64,
}

impl ValueType {
    /// Stable numeric code of this type.
    pub const fn code(self) -> u8 {
        match self {
            ValueType::Unknown => 0,
            ValueType::Double => 1,
            ValueType::Int64 => 2,
            ValueType::String => 3,
            ValueType::Timestamp => 4,
            ValueType::Boolean => 5,
            ValueType::Bytes => 6,
            ValueType::Key => 7,
            ValueType::Uint64 => 8,
        }
    }

    /// Looks a type up by its numeric code.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ValueType::Unknown,
            1 => ValueType::Double,
            2 => ValueType::Int64,
            3 => ValueType::String,
            4 => ValueType::Timestamp,
            5 => ValueType::Boolean,
            6 => ValueType::Bytes,
            7 => ValueType::Key,
            8 => ValueType::Uint64,
            _ => return None,
        })
    }

    /// Upper-case wire name.
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Unknown => "UNKNOWN",
            ValueType::Double => "DOUBLE",
            ValueType::Int64 => "INT64",
            ValueType::String => "STRING",
            ValueType::Timestamp => "TIMESTAMP",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Bytes => "BYTES",
            ValueType::Key => "KEY",
            ValueType::Uint64 => "UINT64",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point in time as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds.
    pub seconds: i64,
    /// Sub-second nanoseconds.
    #[serde(default)]
    pub nanos: i32,
}

impl Timestamp {
    /// Creates a timestamp.
    pub const fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            nanos: i32::try_from(elapsed.subsec_nanos()).unwrap_or(0),
        }
    }
}

/// Payload of a value; exactly one type per value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    /// 64-bit float.
    Double(f64),
    /// Signed 64-bit integer.
    Int64(i64),
    /// UTF-8 string.
    String(String),
    /// Timestamp.
    Timestamp(Timestamp),
    /// Boolean.
    Boolean(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Entity reference; `None` is a nil reference.
    Key(Option<Box<Key>>),
    /// Unsigned 64-bit integer.
    Uint64(u64),
}

impl ValueData {
    /// Type of this payload.
    pub const fn value_type(&self) -> ValueType {
        match self {
            ValueData::Double(_) => ValueType::Double,
            ValueData::Int64(_) => ValueType::Int64,
            ValueData::String(_) => ValueType::String,
            ValueData::Timestamp(_) => ValueType::Timestamp,
            ValueData::Boolean(_) => ValueType::Boolean,
            ValueData::Bytes(_) => ValueType::Bytes,
            ValueData::Key(_) => ValueType::Key,
            ValueData::Uint64(_) => ValueType::Uint64,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueData::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the key payload, if any.
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            ValueData::Key(Some(key)) => Some(key),
            _ => None,
        }
    }
}

impl From<&str> for ValueData {
    fn from(s: &str) -> Self {
        ValueData::String(s.to_string())
    }
}

impl From<String> for ValueData {
    fn from(s: String) -> Self {
        ValueData::String(s)
    }
}

impl From<i64> for ValueData {
    fn from(v: i64) -> Self {
        ValueData::Int64(v)
    }
}

impl From<u64> for ValueData {
    fn from(v: u64) -> Self {
        ValueData::Uint64(v)
    }
}

impl From<bool> for ValueData {
    fn from(v: bool) -> Self {
        ValueData::Boolean(v)
    }
}

impl From<f64> for ValueData {
    fn from(v: f64) -> Self {
        ValueData::Double(v)
    }
}

impl From<Key> for ValueData {
    fn from(key: Key) -> Self {
        ValueData::Key(Some(Box::new(key)))
    }
}

/// A field value: field id plus typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ValueMessage", into = "ValueMessage")]
pub struct Value {
    /// Field id within the entity's kind.
    pub id: u32,
    /// Payload.
    pub data: ValueData,
}

impl Value {
    /// Creates a value.
    pub fn new(id: u32, data: impl Into<ValueData>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Creates a nil key reference.
    pub fn nil_key(id: u32) -> Self {
        Self {
            id,
            data: ValueData::Key(None),
        }
    }

    /// Declared type of the value.
    pub const fn value_type(&self) -> ValueType {
        self.data.value_type()
    }
}

/// Flat wire form of a [`Value`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueMessage {
    /// Field id.
    pub id: u32,
    /// Declared type.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// DOUBLE payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    /// INT64 payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int64_value: Option<i64>,
    /// STRING payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// TIMESTAMP payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_value: Option<Timestamp>,
    /// BOOLEAN payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    /// BYTES payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_value: Option<Vec<u8>>,
    /// KEY payload; absent for a nil reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_value: Option<Key>,
    /// UINT64 payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uint64_value: Option<u64>,
}

impl ValueMessage {
    fn populated(&self) -> Vec<ValueType> {
        let mut present = Vec::new();
        if self.double_value.is_some() {
            present.push(ValueType::Double);
        }
        if self.int64_value.is_some() {
            present.push(ValueType::Int64);
        }
        if self.string_value.is_some() {
            present.push(ValueType::String);
        }
        if self.timestamp_value.is_some() {
            present.push(ValueType::Timestamp);
        }
        if self.boolean_value.is_some() {
            present.push(ValueType::Boolean);
        }
        if self.bytes_value.is_some() {
            present.push(ValueType::Bytes);
        }
        if self.key_value.is_some() {
            present.push(ValueType::Key);
        }
        if self.uint64_value.is_some() {
            present.push(ValueType::Uint64);
        }
        present
    }
}

impl TryFrom<ValueMessage> for Value {
    type Error = CodecError;

    fn try_from(msg: ValueMessage) -> Result<Self, Self::Error> {
        let present = msg.populated();
        let mismatch = |actual: String| CodecError::ValueTypeMismatch {
            id: msg.id,
            declared: msg.value_type.name().to_string(),
            actual,
        };

        let matches = match present.as_slice() {
            [] => msg.value_type == ValueType::Key,
            [only] => *only == msg.value_type,
            _ => false,
        };
        if !matches {
            let actual = if present.is_empty() {
                "no payload".to_string()
            } else {
                present
                    .iter()
                    .map(|t| t.name())
                    .collect::<Vec<_>>()
                    .join("+")
            };
            return Err(mismatch(actual));
        }

        let id = msg.id;
        let data = match msg.value_type {
            ValueType::Double => msg.double_value.map(ValueData::Double),
            ValueType::Int64 => msg.int64_value.map(ValueData::Int64),
            ValueType::String => msg.string_value.map(ValueData::String),
            ValueType::Timestamp => msg.timestamp_value.map(ValueData::Timestamp),
            ValueType::Boolean => msg.boolean_value.map(ValueData::Boolean),
            ValueType::Bytes => msg.bytes_value.map(ValueData::Bytes),
            ValueType::Key => Some(ValueData::Key(msg.key_value.map(Box::new))),
            ValueType::Uint64 => msg.uint64_value.map(ValueData::Uint64),
            ValueType::Unknown => None,
        };
        match data {
            Some(data) => Ok(Value { id, data }),
            None => Err(CodecError::ValueTypeMismatch {
                id,
                declared: ValueType::Unknown.name().to_string(),
                actual: "unknown type".to_string(),
            }),
        }
    }
}

impl From<Value> for ValueMessage {
    fn from(value: Value) -> Self {
        let mut msg = ValueMessage {
            id: value.id,
            value_type: value.data.value_type(),
            ..ValueMessage::default()
        };
        match value.data {
            ValueData::Double(v) => msg.double_value = Some(v),
            ValueData::Int64(v) => msg.int64_value = Some(v),
            ValueData::String(v) => msg.string_value = Some(v),
            ValueData::Timestamp(v) => msg.timestamp_value = Some(v),
            ValueData::Boolean(v) => msg.boolean_value = Some(v),
            ValueData::Bytes(v) => msg.bytes_value = Some(v),
            ValueData::Key(v) => msg.key_value = v.map(|k| *k),
            ValueData::Uint64(v) => msg.uint64_value = Some(v),
        }
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{PartitionId, PathElement};

    #[test]
    fn type_codes_are_stable() {
        for code in 0..=8u8 {
            let t = ValueType::from_code(code).unwrap();
            assert_eq!(t.code(), code);
        }
        assert!(ValueType::from_code(9).is_none());
        assert_eq!(ValueType::Uint64.code(), 8);
    }

    #[test]
    fn wire_mismatch_rejected() {
        let msg = ValueMessage {
            id: 3,
            value_type: ValueType::Int64,
            string_value: Some("oops".into()),
            ..ValueMessage::default()
        };
        let err = Value::try_from(msg).unwrap_err();
        assert!(matches!(err, CodecError::ValueTypeMismatch { id: 3, .. }));
    }

    #[test]
    fn wire_two_payloads_rejected() {
        let msg = ValueMessage {
            id: 1,
            value_type: ValueType::Int64,
            int64_value: Some(1),
            uint64_value: Some(1),
            ..ValueMessage::default()
        };
        assert!(Value::try_from(msg).is_err());
    }

    #[test]
    fn wire_missing_payload_rejected() {
        let msg = ValueMessage {
            id: 1,
            value_type: ValueType::String,
            ..ValueMessage::default()
        };
        assert!(Value::try_from(msg).is_err());

        let unknown = ValueMessage {
            id: 1,
            ..ValueMessage::default()
        };
        assert!(Value::try_from(unknown).is_err());
    }

    #[test]
    fn nil_key_allowed() {
        let msg = ValueMessage {
            id: 4,
            value_type: ValueType::Key,
            ..ValueMessage::default()
        };
        let value = Value::try_from(msg).unwrap();
        assert_eq!(value, Value::nil_key(4));
    }

    #[test]
    fn uint64_max_survives_wire() {
        let value = Value::new(2, u64::MAX);
        let msg = ValueMessage::from(value.clone());
        assert_eq!(msg.uint64_value, Some(u64::MAX));
        assert_eq!(Value::try_from(msg).unwrap(), value);
    }

    #[test]
    fn json_form() {
        let key = Key::top_level(PartitionId::default(), PathElement::with_name("User", "a"));
        let value = Value::new(5, key);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"type\":\"KEY\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);

        let bad = r#"{"id":1,"type":"BOOLEAN","int64_value":3}"#;
        assert!(serde_json::from_str::<Value>(bad).is_err());
    }
}
