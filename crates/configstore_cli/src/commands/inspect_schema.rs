//! Inspect-schema command implementation.

use super::{CliError, Format};
use configstore_codec::ValueType;
use configstore_core::schema::{Schema, SchemaIndexValue, SchemaKind};
use configstore_core::SchemaRegistry;
use serde::Serialize;
use std::path::Path;

/// Schema inspection result.
#[derive(Debug, Serialize)]
pub struct SchemaReport {
    /// Schema name.
    pub name: String,
    /// Kinds in name order.
    pub kinds: Vec<KindReport>,
}

/// Summary of one kind.
#[derive(Debug, Serialize)]
pub struct KindReport {
    /// Kind name.
    pub name: String,
    /// Kind id.
    pub id: u32,
    /// Declared ancestor kinds.
    pub ancestors: Vec<String>,
    /// Declared fields.
    pub fields: Vec<FieldReport>,
    /// Declared indexes.
    pub indexes: Vec<IndexReport>,
}

/// Summary of one field.
#[derive(Debug, Serialize)]
pub struct FieldReport {
    /// Field id.
    pub id: u32,
    /// Field name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub field_type: ValueType,
    /// Read-only on update.
    pub readonly: bool,
    /// Attached validators.
    pub validators: Vec<String>,
}

/// Summary of one index.
#[derive(Debug, Serialize)]
pub struct IndexReport {
    /// Index name.
    pub name: String,
    /// What the index is keyed by.
    pub source: String,
}

/// Loads and checks the schema at `path`.
pub fn inspect(path: &Path) -> Result<SchemaReport, CliError> {
    let schema = Schema::load(path)?;
    let registry = SchemaRegistry::new(schema)?;
    let schema = registry.schema();
    tracing::debug!(path = %path.display(), kinds = schema.kinds.len(), "schema loaded");

    Ok(SchemaReport {
        name: schema.name.clone(),
        kinds: schema
            .kinds
            .iter()
            .map(|(name, kind)| kind_report(name, kind))
            .collect(),
    })
}

fn kind_report(name: &str, kind: &SchemaKind) -> KindReport {
    KindReport {
        name: name.to_string(),
        id: kind.id,
        ancestors: kind.ancestors.clone(),
        fields: kind
            .fields
            .iter()
            .map(|f| FieldReport {
                id: f.id,
                name: f.name.clone(),
                field_type: f.field_type,
                readonly: f.readonly,
                validators: f.validators().iter().map(|v| format!("{v:?}")).collect(),
            })
            .collect(),
        indexes: kind
            .indexes
            .iter()
            .map(|i| IndexReport {
                name: i.name.clone(),
                source: match &i.value {
                    SchemaIndexValue::Field(field) => field.clone(),
                    SchemaIndexValue::Computed(computed) => {
                        let bits = if computed.is_64() { 64 } else { 32 };
                        format!("fnv{bits}a({})", computed.fields().join(", "))
                    }
                },
            })
            .collect(),
    }
}

/// Runs the inspect-schema command.
pub fn run(path: &Path, format: Format) -> Result<(), CliError> {
    let report = inspect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &SchemaReport) {
    println!("Configstore Schema: {}", report.name);
    println!("==================");
    for kind in &report.kinds {
        println!();
        println!("[{}] {}", kind.id, kind.name);
        if !kind.ancestors.is_empty() {
            println!("  Ancestors: {}", kind.ancestors.join(" / "));
        }
        println!("  Fields:");
        for field in &kind.fields {
            let readonly = if field.readonly { " readonly" } else { "" };
            println!("    {:>3} {:<24} {}{}", field.id, field.name, field.field_type, readonly);
            for v in &field.validators {
                println!("        {v}");
            }
        }
        if !kind.indexes.is_empty() {
            println!("  Indexes:");
            for index in &kind.indexes {
                println!("    {:<24} {}", index.name, index.source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_testkit::{sample_schema, JsonFiles};

    #[test]
    fn reports_kinds_and_indexes() {
        let files = JsonFiles::new();
        let path = files.write("schema.json", &sample_schema());

        let report = inspect(&path).unwrap();
        let names: Vec<_> = report.kinds.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["Cluster", "IndexTest", "Server", "User"]);

        let index_test = &report.kinds[1];
        assert!(index_test
            .indexes
            .iter()
            .any(|i| i.name == "ab_fnv32" && i.source == "fnv32a(a, b)"));
        assert_eq!(report.kinds[2].ancestors, vec!["Cluster".to_string()]);
    }

    #[test]
    fn rejects_an_inconsistent_schema() {
        let files = JsonFiles::new();
        let path = files.write_raw(
            "schema.json",
            r#"{"kinds": {"A": {"fields": [
                {"id": 1, "name": "x", "type": "STRING"},
                {"id": 1, "name": "y", "type": "STRING"}
            ]}}}"#,
        );
        assert!(matches!(
            inspect(&path),
            Err(CliError::Core(configstore_core::CoreError::InvalidSchema { .. }))
        ));
    }
}
