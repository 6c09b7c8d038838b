//! Schema definition types.

use crate::error::{CoreError, CoreResult};
use configstore_codec::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The full schema: every kind the store accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name.
    #[serde(default)]
    pub name: String,
    /// Kinds by name.
    #[serde(default)]
    pub kinds: BTreeMap<String, SchemaKind>,
}

impl Schema {
    /// Parses a schema from JSON.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a schema from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes the schema as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Looks up a kind.
    pub fn kind(&self, name: &str) -> Option<&SchemaKind> {
        self.kinds.get(name)
    }

    /// Returns the kind, or an `UnknownKind` error.
    pub fn require_kind(&self, name: &str) -> CoreResult<&SchemaKind> {
        self.kinds
            .get(name)
            .ok_or_else(|| CoreError::unknown_kind(name))
    }
}

/// An entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaKind {
    /// Numeric id.
    #[serde(default)]
    pub id: u32,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    /// Editor hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<SchemaKindEditor>,
    /// Secondary indexes maintained for this kind.
    #[serde(default)]
    pub indexes: Vec<SchemaIndex>,
    /// Kinds this kind may be nested under, outermost first.
    #[serde(default)]
    pub ancestors: Vec<String>,
}

impl SchemaKind {
    /// Looks up a field by id.
    pub fn field(&self, id: u32) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Looks up a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> Option<&SchemaIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Editor hints for a kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaKindEditor {
    /// Singular display name.
    pub singular: String,
    /// Plural display name.
    pub plural: String,
    /// Field shown when this kind appears in a dropdown.
    pub render_editor_dropdown_with_field: String,
    /// Explanation of how keys of this kind are chosen.
    pub key_comment: String,
    /// Field listings are sorted by.
    pub sort_by_field: String,
}

/// A field of a kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Field id, used as [`Value::id`].
    pub id: u32,
    /// Field name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub field_type: ValueType,
    /// Documentation.
    #[serde(default)]
    pub comment: String,
    /// Editor hints and validators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<SchemaFieldEditorInfo>,
    /// Whether updates may change the field.
    #[serde(default)]
    pub readonly: bool,
}

impl SchemaField {
    /// Creates a field with no editor info.
    pub fn new(id: u32, name: impl Into<String>, field_type: ValueType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            comment: String::new(),
            editor: None,
            readonly: false,
        }
    }

    /// Validators attached to the field.
    pub fn validators(&self) -> &[SchemaFieldEditorValidator] {
        self.editor
            .as_ref()
            .map(|e| e.validators.as_slice())
            .unwrap_or(&[])
    }

    /// Returns true if a `Required` validator is attached.
    pub fn is_required(&self) -> bool {
        self.validators()
            .iter()
            .any(|v| matches!(v, SchemaFieldEditorValidator::Required))
    }

    /// Default value, if a `Default` validator is attached.
    pub fn default_value(&self) -> Option<&Value> {
        self.validators().iter().find_map(|v| match v {
            SchemaFieldEditorValidator::Default { value } => Some(value),
            _ => None,
        })
    }
}

/// How the editor renders a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldEditorType {
    /// Plain input.
    #[default]
    Default,
    /// Masked input.
    Password,
    /// Lookup of another entity.
    Lookup,
}

/// Editor hints for a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaFieldEditorInfo {
    /// Label shown in the editor.
    pub display_name: String,
    /// Editor widget.
    #[serde(rename = "type")]
    pub editor_type: FieldEditorType,
    /// Whether the editor shows the field read-only.
    pub editor_readonly: bool,
    /// Kinds a KEY field may reference; empty allows any.
    pub allowed_kinds: Vec<String>,
    /// Whether the editor converts financial values to nibblins.
    pub use_financial_value_to_nibblins_conversion: bool,
    /// Validators applied on write.
    pub validators: Vec<SchemaFieldEditorValidator>,
    /// Whether the editor renders a textarea.
    pub textarea: bool,
}

/// A field validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFieldEditorValidator {
    /// Field must be present (and non-empty for strings and bytes).
    Required,
    /// String (in characters) or bytes must have exactly this length.
    FixedLength {
        /// Required length.
        length: u64,
    },
    /// Value filled in on create when the field is absent.
    Default {
        /// Default payload; its id is ignored.
        value: Value,
    },
    /// String must be an IPv4 or IPv6 address.
    FormatIpAddress,
    /// String must be an address with a port.
    FormatIpAddressPort,
}

/// Storage class of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaIndexType {
    /// Unspecified; maintained in memory.
    #[default]
    Unspecified,
    /// In-memory index.
    Memory,
}

/// A secondary index of a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIndex {
    /// Index name.
    pub name: String,
    /// Storage class.
    #[serde(rename = "type", default)]
    pub index_type: SchemaIndexType,
    /// What the index is keyed by.
    pub value: SchemaIndexValue,
}

impl SchemaIndex {
    /// Creates an index on a single field.
    pub fn field(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index_type: SchemaIndexType::Memory,
            value: SchemaIndexValue::Field(field.into()),
        }
    }

    /// Creates a computed index.
    pub fn computed(name: impl Into<String>, computed: SchemaComputedIndex) -> Self {
        Self {
            name: name.into(),
            index_type: SchemaIndexType::Memory,
            value: SchemaIndexValue::Computed(computed),
        }
    }
}

/// Source of an index's terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaIndexValue {
    /// The raw value of one field.
    Field(String),
    /// A hash over one or two fields.
    Computed(SchemaComputedIndex),
}

/// Hash computed over field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaComputedIndex {
    /// FNV-1a 64 of one field.
    Fnv64a {
        /// Field name.
        field: String,
    },
    /// FNV-1a 64 of two fields, concatenated.
    Fnv64aPair {
        /// First field name.
        field1: String,
        /// Second field name.
        field2: String,
    },
    /// FNV-1a 32 of one field.
    Fnv32a {
        /// Field name.
        field: String,
    },
    /// FNV-1a 32 of two fields, concatenated.
    Fnv32aPair {
        /// First field name.
        field1: String,
        /// Second field name.
        field2: String,
    },
}

impl SchemaComputedIndex {
    /// Field names the hash is computed over, in order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            SchemaComputedIndex::Fnv64a { field } | SchemaComputedIndex::Fnv32a { field } => {
                vec![field.as_str()]
            }
            SchemaComputedIndex::Fnv64aPair { field1, field2 }
            | SchemaComputedIndex::Fnv32aPair { field1, field2 } => {
                vec![field1.as_str(), field2.as_str()]
            }
        }
    }

    /// Returns true for the 64-bit variants.
    pub fn is_64(&self) -> bool {
        matches!(
            self,
            SchemaComputedIndex::Fnv64a { .. } | SchemaComputedIndex::Fnv64aPair { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCHEMA_JSON: &str = r#"{
        "name": "game",
        "kinds": {
            "Server": {
                "id": 2,
                "ancestors": ["Cluster"],
                "fields": [
                    {"id": 1, "name": "address", "type": "STRING",
                     "editor": {"validators": ["required", "format_ip_address_port"]}},
                    {"id": 2, "name": "weight", "type": "INT64",
                     "editor": {"validators": [{"default": {"value": {"id": 0, "type": "INT64", "int64_value": 10}}}]}}
                ],
                "indexes": [
                    {"name": "byAddress", "type": "MEMORY", "value": {"computed": {"fnv64a": {"field": "address"}}}}
                ]
            },
            "Cluster": {"id": 1, "fields": []}
        }
    }"#;

    #[test]
    fn parses_json() {
        let schema = Schema::from_json_str(SCHEMA_JSON).unwrap();
        assert_eq!(schema.name, "game");
        let server = schema.kind("Server").unwrap();
        assert_eq!(server.ancestors, vec!["Cluster".to_string()]);
        let address = server.field_by_name("address").unwrap();
        assert!(address.is_required());
        let weight = server.field(2).unwrap();
        assert_eq!(
            weight.default_value().map(|v| v.data.clone()),
            Some(configstore_codec::ValueData::Int64(10))
        );
        assert!(matches!(
            server.index("byAddress").unwrap().value,
            SchemaIndexValue::Computed(SchemaComputedIndex::Fnv64a { .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCHEMA_JSON.as_bytes()).unwrap();
        let schema = Schema::load(file.path()).unwrap();
        assert_eq!(schema.kinds.len(), 2);
    }

    #[test]
    fn json_roundtrip() {
        let schema = Schema::from_json_str(SCHEMA_JSON).unwrap();
        let json = schema.to_json_pretty().unwrap();
        assert_eq!(Schema::from_json_str(&json).unwrap(), schema);
    }

    #[test]
    fn missing_kind_is_error() {
        let schema = Schema::default();
        assert!(matches!(
            schema.require_kind("Nope"),
            Err(CoreError::UnknownKind { .. })
        ));
    }

    #[test]
    fn pair_fields() {
        let idx = SchemaComputedIndex::Fnv32aPair {
            field1: "a".into(),
            field2: "b".into(),
        };
        assert_eq!(idx.fields(), vec!["a", "b"]);
        assert!(!idx.is_64());
    }
}
