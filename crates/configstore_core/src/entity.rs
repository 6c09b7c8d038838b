//! Entities.

use configstore_codec::{Key, Value, ValueData};
use serde::{Deserialize, Serialize};

/// An entity: a key plus its field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntity {
    /// Address of the entity.
    pub key: Key,
    /// Field values, at most one per field id.
    #[serde(default)]
    pub values: Vec<Value>,
}

impl MetaEntity {
    /// Creates an entity.
    pub fn new(key: Key, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    /// Creates an entity with no values.
    pub fn empty(key: Key) -> Self {
        Self {
            key,
            values: Vec::new(),
        }
    }

    /// Kind of the entity, taken from its key.
    pub fn kind(&self) -> &str {
        self.key.kind()
    }

    /// Looks up the value for a field id.
    pub fn value(&self, field_id: u32) -> Option<&Value> {
        self.values.iter().find(|v| v.id == field_id)
    }

    /// Looks up the payload for a field id.
    pub fn data(&self, field_id: u32) -> Option<&ValueData> {
        self.value(field_id).map(|v| &v.data)
    }

    /// Sets a value, replacing any existing value for the same field.
    pub fn set_value(&mut self, value: Value) {
        match self.values.iter_mut().find(|v| v.id == value.id) {
            Some(existing) => *existing = value,
            None => self.values.push(value),
        }
    }

    /// Builder form of [`set_value`](Self::set_value).
    #[must_use]
    pub fn with_value(mut self, id: u32, data: impl Into<ValueData>) -> Self {
        self.set_value(Value::new(id, data));
        self
    }
}
