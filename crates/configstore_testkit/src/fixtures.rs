//! Test fixtures and store helpers.
//!
//! Provides a sample schema, entity and operation builders, and a store
//! that records its trace events in memory.

use configstore_codec::{Key, PartitionId, PathElement, Value, ValueType};
use configstore_core::schema::{
    Schema, SchemaComputedIndex, SchemaField, SchemaFieldEditorInfo, SchemaFieldEditorValidator,
    SchemaIndex, SchemaKind, SchemaKindEditor,
};
use configstore_core::{
    Config, Configstore, Cursor, MemoryTraceSink, MetaCreateEntityRequest,
    MetaDeleteEntityRequest, MetaEntity, MetaGetEntityRequest, MetaListEntitiesRequest,
    MetaOperation, MetaTransaction, MetaUpdateEntityRequest,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Field ids of the `User` kind.
pub mod user_fields {
    /// Display name; required.
    pub const NAME: u32 = 1;
    /// Email address; indexed.
    pub const EMAIL: u32 = 2;
    /// Login address; must be an IP address.
    pub const IP: u32 = 3;
    /// Serial number; read-only.
    pub const SERIAL: u32 = 4;
    /// Role; defaults to `member`.
    pub const ROLE: u32 = 5;
}

/// Field ids of the `IndexTest` kind.
pub mod index_test_fields {
    /// First string.
    pub const A: u32 = 1;
    /// Second string.
    pub const B: u32 = 2;
    /// Counter.
    pub const COUNT: u32 = 3;
}

/// Field ids of the `Server` kind.
pub mod server_fields {
    /// `host:port`.
    pub const ADDRESS: u32 = 1;
    /// Reference to a `Cluster`.
    pub const CLUSTER: u32 = 2;
}

fn field(id: u32, name: &str, t: ValueType, validators: Vec<SchemaFieldEditorValidator>) -> SchemaField {
    let mut field = SchemaField::new(id, name, t);
    if !validators.is_empty() {
        field.editor = Some(SchemaFieldEditorInfo {
            display_name: name.to_string(),
            validators,
            ..SchemaFieldEditorInfo::default()
        });
    }
    field
}

/// Schema shared by the integration tests.
///
/// - `User`: `name` (required), `email` (indexed, plus an FNV-64 hash index),
///   `ip` (IP address), `serial` (read-only), `role` (default `member`)
/// - `IndexTest`: strings `a` and `b` and an `Int64` counter, with every
///   computed index variant
/// - `Cluster`: `name`
/// - `Server`: child of `Cluster`, with an address and a `Cluster` reference
pub fn sample_schema() -> Schema {
    let mut schema = Schema {
        name: "sample".to_string(),
        ..Schema::default()
    };

    let mut serial = field(user_fields::SERIAL, "serial", ValueType::String, vec![]);
    serial.readonly = true;
    schema.kinds.insert(
        "User".to_string(),
        SchemaKind {
            id: 1,
            fields: vec![
                field(
                    user_fields::NAME,
                    "name",
                    ValueType::String,
                    vec![SchemaFieldEditorValidator::Required],
                ),
                field(user_fields::EMAIL, "email", ValueType::String, vec![]),
                field(
                    user_fields::IP,
                    "ip",
                    ValueType::String,
                    vec![SchemaFieldEditorValidator::FormatIpAddress],
                ),
                serial,
                field(
                    user_fields::ROLE,
                    "role",
                    ValueType::String,
                    vec![SchemaFieldEditorValidator::Default {
                        value: Value::new(0, "member"),
                    }],
                ),
            ],
            editor: Some(SchemaKindEditor {
                singular: "user".to_string(),
                plural: "users".to_string(),
                render_editor_dropdown_with_field: "name".to_string(),
                key_comment: String::new(),
                sort_by_field: "name".to_string(),
            }),
            indexes: vec![
                SchemaIndex::field("by_email", "email"),
                SchemaIndex::computed(
                    "email_fnv",
                    SchemaComputedIndex::Fnv64a {
                        field: "email".to_string(),
                    },
                ),
            ],
            ancestors: vec![],
        },
    );

    schema.kinds.insert(
        "IndexTest".to_string(),
        SchemaKind {
            id: 2,
            fields: vec![
                field(index_test_fields::A, "a", ValueType::String, vec![]),
                field(index_test_fields::B, "b", ValueType::String, vec![]),
                field(index_test_fields::COUNT, "count", ValueType::Int64, vec![]),
            ],
            indexes: vec![
                SchemaIndex::field("by_count", "count"),
                SchemaIndex::computed(
                    "a_fnv64",
                    SchemaComputedIndex::Fnv64a {
                        field: "a".to_string(),
                    },
                ),
                SchemaIndex::computed(
                    "a_fnv32",
                    SchemaComputedIndex::Fnv32a {
                        field: "a".to_string(),
                    },
                ),
                SchemaIndex::computed(
                    "ab_fnv64",
                    SchemaComputedIndex::Fnv64aPair {
                        field1: "a".to_string(),
                        field2: "b".to_string(),
                    },
                ),
                SchemaIndex::computed(
                    "ab_fnv32",
                    SchemaComputedIndex::Fnv32aPair {
                        field1: "a".to_string(),
                        field2: "b".to_string(),
                    },
                ),
            ],
            ..SchemaKind::default()
        },
    );

    schema.kinds.insert(
        "Cluster".to_string(),
        SchemaKind {
            id: 3,
            fields: vec![field(1, "name", ValueType::String, vec![])],
            ..SchemaKind::default()
        },
    );

    let mut cluster_ref = field(server_fields::CLUSTER, "cluster", ValueType::Key, vec![]);
    cluster_ref.editor = Some(SchemaFieldEditorInfo {
        allowed_kinds: vec!["Cluster".to_string()],
        ..SchemaFieldEditorInfo::default()
    });
    schema.kinds.insert(
        "Server".to_string(),
        SchemaKind {
            id: 4,
            fields: vec![
                field(
                    server_fields::ADDRESS,
                    "address",
                    ValueType::String,
                    vec![SchemaFieldEditorValidator::FormatIpAddressPort],
                ),
                cluster_ref,
            ],
            ancestors: vec!["Cluster".to_string()],
            ..SchemaKind::default()
        },
    );

    schema
}

/// A store over [`sample_schema`] with its trace events kept in memory.
pub struct TestStore {
    /// The store.
    pub store: Arc<Configstore>,
    /// Every trace event the store emitted.
    pub sink: Arc<MemoryTraceSink>,
}

impl TestStore {
    /// Opens an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens an empty store with `config`.
    pub fn with_config(config: Config) -> Self {
        Self::with_entities(config, Vec::new())
    }

    /// Opens a store preloaded with `entities`.
    pub fn with_entities(config: Config, entities: Vec<MetaEntity>) -> Self {
        let sink = Arc::new(MemoryTraceSink::new());
        let store = Configstore::bootstrap(sample_schema(), config, sink.clone(), entities)
            .expect("Failed to open test store");
        Self {
            store: Arc::new(store),
            sink,
        }
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = Configstore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Key of a top-level `User` named `name`, in the default partition.
pub fn user_key(name: &str) -> Key {
    Key::top_level(PartitionId::default(), PathElement::with_name("User", name))
}

/// A valid `User` named `name`.
pub fn user(name: &str) -> MetaEntity {
    MetaEntity::empty(user_key(name)).with_value(user_fields::NAME, name)
}

/// A `User` with an email address.
pub fn user_with_email(name: &str, email: &str) -> MetaEntity {
    user(name).with_value(user_fields::EMAIL, email)
}

/// Key of a `Cluster`.
pub fn cluster_key(name: &str) -> Key {
    Key::top_level(PartitionId::default(), PathElement::with_name("Cluster", name))
}

/// A `Cluster`.
pub fn cluster(name: &str) -> MetaEntity {
    MetaEntity::empty(cluster_key(name)).with_value(1, name)
}

/// A `Server` below `cluster` with `address` and a reference back to it.
pub fn server(cluster: &str, id: i64, address: &str) -> MetaEntity {
    let parent = cluster_key(cluster);
    MetaEntity::empty(parent.child(PathElement::with_id("Server", id)))
        .with_value(server_fields::ADDRESS, address)
        .with_value(server_fields::CLUSTER, parent)
}

/// An `IndexTest` entity.
pub fn index_test(id: i64, a: &str, b: &str, count: i64) -> MetaEntity {
    MetaEntity::empty(Key::top_level(
        PartitionId::default(),
        PathElement::with_id("IndexTest", id),
    ))
    .with_value(index_test_fields::A, a)
    .with_value(index_test_fields::B, b)
    .with_value(index_test_fields::COUNT, count)
}

/// Create operation for `entity`, kind taken from its key.
pub fn create_op(entity: MetaEntity) -> MetaOperation {
    MetaOperation::Create(MetaCreateEntityRequest {
        kind_name: entity.kind().to_string(),
        entity,
    })
}

/// Update operation for `entity`.
pub fn update_op(entity: MetaEntity) -> MetaOperation {
    MetaOperation::Update(MetaUpdateEntityRequest { entity })
}

/// Delete operation for `key`.
pub fn delete_op(key: Key) -> MetaOperation {
    MetaOperation::Delete(MetaDeleteEntityRequest {
        kind_name: key.kind().to_string(),
        key,
    })
}

/// Get operation for `key`.
pub fn get_op(key: Key) -> MetaOperation {
    MetaOperation::Get(MetaGetEntityRequest {
        kind_name: key.kind().to_string(),
        key,
    })
}

/// List operation over `kind` from the start.
pub fn list_op(kind: &str, limit: u32) -> MetaOperation {
    MetaOperation::List(list_request(kind, Cursor::start(), limit))
}

/// List request over `kind`.
pub fn list_request(kind: &str, start: Cursor, limit: u32) -> MetaListEntitiesRequest {
    MetaListEntitiesRequest {
        kind_name: kind.to_string(),
        start,
        limit,
    }
}

/// Transaction of `operations`.
pub fn transaction(operations: Vec<MetaOperation>) -> MetaTransaction {
    MetaTransaction {
        operations,
        description: "test".to_string(),
    }
}

/// A temporary directory holding JSON input files.
pub struct JsonFiles {
    dir: TempDir,
}

impl JsonFiles {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `value` as pretty JSON to `name` and returns the file path.
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> PathBuf {
        let path = self.dir.path().join(name);
        let json = serde_json::to_string_pretty(value).expect("Failed to encode JSON");
        std::fs::write(&path, json).expect("Failed to write JSON file");
        path
    }

    /// Writes raw text to `name` and returns the file path.
    pub fn write_raw(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }
}

impl Default for JsonFiles {
    fn default() -> Self {
        Self::new()
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `count` users named `user-000`, `user-001`, ...
    pub fn populated_store(count: usize) -> TestStore {
        let users = (0..count).map(|i| user(&format!("user-{i:03}"))).collect();
        TestStore::with_entities(Config::default(), users)
    }

    /// A store holding one cluster with `servers` servers below it.
    pub fn cluster_with_servers(servers: i64) -> TestStore {
        let mut entities = vec![cluster("main")];
        entities.extend((1..=servers).map(|id| server("main", id, &format!("10.0.0.{id}:8080"))));
        TestStore::with_entities(Config::default(), entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_core::SchemaRegistry;

    #[test]
    fn sample_schema_is_valid() {
        let registry = SchemaRegistry::new(sample_schema()).unwrap();
        for entity in [
            user("alice"),
            cluster("main"),
            server("main", 1, "10.0.0.1:80"),
            index_test(1, "x", "y", 3),
        ] {
            registry.validate(entity.kind(), &entity).unwrap();
        }
    }

    #[test]
    fn populated_store_has_entities() {
        let store = scenarios::populated_store(12);
        assert_eq!(store.len(), 12);
        assert!(store.entity(&user_key("user-011")).is_some());
    }

    #[test]
    fn json_files_round_trip() {
        let files = JsonFiles::new();
        let path = files.write("schema.json", &sample_schema());
        assert_eq!(Schema::load(&path).unwrap(), sample_schema());
    }
}
