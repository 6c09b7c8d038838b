//! Schema registry: the checked, immutable schema plus compiled validators.

use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult, SchemaViolation};
use crate::schema::model::{
    Schema, SchemaFieldEditorValidator, SchemaIndexValue, SchemaKind,
};
use crate::schema::validator::{self, FieldValidator};
use configstore_codec::{Key, Value, ValueType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct CompiledKind {
    /// Validators per field id.
    validators: HashMap<u32, Vec<Box<dyn FieldValidator>>>,
}

/// Immutable schema with per-kind validators.
///
/// Built once at startup; [`SchemaRegistry::new`] rejects inconsistent
/// definitions so that later validation never has to.
pub struct SchemaRegistry {
    schema: Arc<Schema>,
    compiled: HashMap<String, CompiledKind>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("name", &self.schema.name)
            .field("kinds", &self.schema.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaRegistry {
    /// Checks `schema` and compiles its validators.
    pub fn new(schema: Schema) -> CoreResult<Self> {
        let mut compiled = HashMap::new();
        for (name, kind) in &schema.kinds {
            check_kind(&schema, name, kind)?;
            let mut validators = HashMap::new();
            for field in &kind.fields {
                let compiled_field: Vec<_> =
                    field.validators().iter().filter_map(validator::compile).collect();
                validators.insert(field.id, compiled_field);
            }
            compiled.insert(name.clone(), CompiledKind { validators });
        }
        Ok(Self {
            schema: Arc::new(schema),
            compiled,
        })
    }

    /// Read-only schema snapshot.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Shared handle to the schema.
    pub fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Looks up a kind.
    pub fn kind(&self, name: &str) -> Option<&SchemaKind> {
        self.schema.kind(name)
    }

    /// Checks that `entity` is a valid entity of `kind_name`.
    pub fn validate(&self, kind_name: &str, entity: &MetaEntity) -> Result<(), SchemaViolation> {
        let kind = self.require_kind(kind_name)?;
        check_key_path(kind_name, kind, &entity.key)?;

        let mut seen = HashSet::new();
        for value in &entity.values {
            let field = kind
                .field(value.id)
                .ok_or_else(|| SchemaViolation::UnknownField {
                    kind: kind_name.to_string(),
                    field_id: value.id,
                })?;
            if !seen.insert(value.id) {
                return Err(SchemaViolation::DuplicateField {
                    field: field.name.clone(),
                });
            }
            let actual = value.value_type();
            if actual != field.field_type {
                return Err(SchemaViolation::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.field_type,
                    actual,
                });
            }
            if let (Some(editor), Some(target)) = (&field.editor, value.data.as_key()) {
                if !editor.allowed_kinds.is_empty()
                    && !editor.allowed_kinds.iter().any(|k| k == target.kind())
                {
                    return Err(SchemaViolation::DisallowedKeyKind {
                        field: field.name.clone(),
                        kind: target.kind().to_string(),
                    });
                }
            }
        }

        if let Some(compiled) = self.compiled.get(kind_name) {
            for field in &kind.fields {
                if let Some(validators) = compiled.validators.get(&field.id) {
                    let data = entity.data(field.id);
                    for v in validators {
                        v.check(field, data)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fills in absent fields that declare a default.
    pub fn apply_defaults(&self, kind_name: &str, entity: &mut MetaEntity) {
        let Some(kind) = self.schema.kind(kind_name) else {
            return;
        };
        for field in &kind.fields {
            if entity.value(field.id).is_some() {
                continue;
            }
            if let Some(default) = field.default_value() {
                entity.values.push(Value {
                    id: field.id,
                    data: default.data.clone(),
                });
            }
        }
    }

    /// Rejects an update that changes a read-only field.
    pub fn check_readonly(
        &self,
        kind_name: &str,
        previous: &MetaEntity,
        next: &MetaEntity,
    ) -> Result<(), SchemaViolation> {
        let kind = self.require_kind(kind_name)?;
        for field in kind.fields.iter().filter(|f| f.readonly) {
            if previous.data(field.id) != next.data(field.id) {
                return Err(SchemaViolation::ReadOnlyField {
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Checks only the key part of an entity: completeness, kind and ancestry.
    pub fn validate_key(
        &self,
        kind_name: &str,
        key: &Key,
    ) -> Result<(), SchemaViolation> {
        let kind = self.require_kind(kind_name)?;
        check_key_path(kind_name, kind, key)
    }

    fn require_kind(&self, kind_name: &str) -> Result<&SchemaKind, SchemaViolation> {
        self.schema
            .kind(kind_name)
            .ok_or_else(|| SchemaViolation::UnknownKind {
                kind: kind_name.to_string(),
            })
    }
}

fn check_key_path(
    kind_name: &str,
    kind: &SchemaKind,
    key: &Key,
) -> Result<(), SchemaViolation> {
    if !key.is_complete() {
        return Err(SchemaViolation::IncompleteKey {
            key: key.to_string(),
        });
    }
    if key.kind() != kind_name {
        return Err(SchemaViolation::KindMismatch {
            expected: kind_name.to_string(),
            actual: key.kind().to_string(),
        });
    }

    // Ancestor kinds must appear in the declared list, in the same order.
    let ancestors = &key.path[..key.path.len() - 1];
    let mut declared = kind.ancestors.iter();
    for element in ancestors {
        if !declared.any(|d| *d == element.kind) {
            return Err(SchemaViolation::AncestorViolation {
                kind: kind_name.to_string(),
                path: ancestors
                    .iter()
                    .map(|e| e.kind.as_str())
                    .collect::<Vec<_>>()
                    .join("/"),
            });
        }
    }
    Ok(())
}

fn check_kind(schema: &Schema, name: &str, kind: &SchemaKind) -> CoreResult<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for field in &kind.fields {
        if !ids.insert(field.id) {
            return Err(CoreError::invalid_schema(format!(
                "kind {name} declares field id {} twice",
                field.id
            )));
        }
        if !names.insert(field.name.as_str()) {
            return Err(CoreError::invalid_schema(format!(
                "kind {name} declares field {} twice",
                field.name
            )));
        }
        if field.field_type == ValueType::Unknown {
            return Err(CoreError::invalid_schema(format!(
                "field {name}.{} has no type",
                field.name
            )));
        }
        for v in field.validators() {
            let ok = match v {
                SchemaFieldEditorValidator::Required => true,
                SchemaFieldEditorValidator::FixedLength { .. } => {
                    matches!(field.field_type, ValueType::String | ValueType::Bytes)
                }
                SchemaFieldEditorValidator::FormatIpAddress
                | SchemaFieldEditorValidator::FormatIpAddressPort => {
                    field.field_type == ValueType::String
                }
                SchemaFieldEditorValidator::Default { value } => {
                    value.value_type() == field.field_type
                }
            };
            if !ok {
                return Err(CoreError::invalid_schema(format!(
                    "validator {v:?} does not apply to {} field {name}.{}",
                    field.field_type, field.name
                )));
            }
        }
    }

    for ancestor in &kind.ancestors {
        if !schema.kinds.contains_key(ancestor) {
            return Err(CoreError::invalid_schema(format!(
                "kind {name} lists unknown ancestor {ancestor}"
            )));
        }
    }

    let mut index_names = HashSet::new();
    for index in &kind.indexes {
        if !index_names.insert(index.name.as_str()) {
            return Err(CoreError::invalid_schema(format!(
                "kind {name} declares index {} twice",
                index.name
            )));
        }
        let fields = match &index.value {
            SchemaIndexValue::Field(field) => vec![field.as_str()],
            SchemaIndexValue::Computed(computed) => computed.fields(),
        };
        for field in fields {
            if kind.field_by_name(field).is_none() {
                return Err(CoreError::invalid_schema(format!(
                    "index {name}.{} refers to unknown field {field}",
                    index.name
                )));
            }
        }
    }
    Ok(())
}
