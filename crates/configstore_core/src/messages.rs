//! Transaction and watch messages.

use crate::entity::MetaEntity;
use crate::error::{ErrorCode, OperationError};
use configstore_codec::{Cursor, Key, Timestamp};
use serde::{Deserialize, Serialize};

/// List a page of entities of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaListEntitiesRequest {
    /// Kind to list.
    pub kind_name: String,
    /// Resume after this cursor; empty lists from the beginning.
    #[serde(default)]
    pub start: Cursor,
    /// Page size; `0` uses the configured default.
    #[serde(default)]
    pub limit: u32,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaListEntitiesResponse {
    /// Entities in key order.
    pub entities: Vec<MetaEntity>,
    /// Cursor to pass as `start` for the next page; empty once exhausted.
    pub next: Cursor,
    /// Whether more entities follow this page.
    pub more_results: bool,
}

/// Fetch one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaGetEntityRequest {
    /// Kind the key must address.
    pub kind_name: String,
    /// Key to fetch.
    pub key: Key,
}

/// Result of a get.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaGetEntityResponse {
    /// The entity.
    pub entity: MetaEntity,
}

/// Create a new entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaCreateEntityRequest {
    /// Kind of the new entity.
    pub kind_name: String,
    /// Entity to create; an incomplete last key element is allocated.
    pub entity: MetaEntity,
}

/// Result of a create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaCreateEntityResponse {
    /// The stored entity, with its final key and defaults applied.
    pub entity: MetaEntity,
}

/// Replace an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaUpdateEntityRequest {
    /// New entity contents; the kind is taken from the key.
    pub entity: MetaEntity,
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaUpdateEntityResponse {
    /// The stored entity.
    pub entity: MetaEntity,
}

/// Delete an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaDeleteEntityRequest {
    /// Kind the key must address.
    pub kind_name: String,
    /// Key to delete.
    pub key: Key,
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDeleteEntityResponse {
    /// Last known value, or an empty entity if the key was absent.
    pub entity: MetaEntity,
}

/// One operation of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaOperation {
    /// List a kind.
    List(MetaListEntitiesRequest),
    /// Get one entity.
    Get(MetaGetEntityRequest),
    /// Update one entity.
    Update(MetaUpdateEntityRequest),
    /// Create one entity.
    Create(MetaCreateEntityRequest),
    /// Delete one entity.
    Delete(MetaDeleteEntityRequest),
}

impl MetaOperation {
    /// Returns true for operations that may change the store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            MetaOperation::Update(_) | MetaOperation::Create(_) | MetaOperation::Delete(_)
        )
    }
}

/// An ordered batch of operations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaTransaction {
    /// Operations, applied in order.
    #[serde(default)]
    pub operations: Vec<MetaOperation>,
    /// Free-form description recorded in the log.
    #[serde(default)]
    pub description: String,
}

impl MetaTransaction {
    /// Creates an empty transaction with a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            operations: Vec::new(),
            description: description.into(),
        }
    }

    /// Appends an operation.
    #[must_use]
    pub fn with(mut self, operation: MetaOperation) -> Self {
        self.operations.push(operation);
        self
    }
}

/// Error attached to one operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaOperationResultError {
    /// Error category.
    pub code: ErrorCode,
    /// Human-readable message.
    pub error_message: String,
}

impl From<&OperationError> for MetaOperationResultError {
    fn from(err: &OperationError) -> Self {
        Self {
            code: err.code(),
            error_message: err.to_string(),
        }
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaOperationResult {
    /// List succeeded.
    List(MetaListEntitiesResponse),
    /// Get succeeded.
    Get(MetaGetEntityResponse),
    /// Update succeeded.
    Update(MetaUpdateEntityResponse),
    /// Create succeeded.
    Create(MetaCreateEntityResponse),
    /// Delete succeeded.
    Delete(MetaDeleteEntityResponse),
    /// Operation failed.
    Error(MetaOperationResultError),
}

impl MetaOperationResult {
    /// Returns the error, if this result is one.
    pub fn error(&self) -> Option<&MetaOperationResultError> {
        match self {
            MetaOperationResult::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.error().is_none()
    }
}

/// Outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaTransactionResult {
    /// One result per input operation, in input order.
    pub operation_results: Vec<MetaOperationResult>,
    /// Whether the transaction's writes were applied.
    pub committed: bool,
    /// Id of the logged transaction; `None` when nothing was logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Log-retained metadata of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTransactionRecord {
    /// Transaction id.
    pub id: String,
    /// When the transaction arrived.
    pub date_submitted: Timestamp,
    /// When the transaction committed.
    pub date_created: Timestamp,
    /// Description supplied by the client.
    pub description: String,
    /// Keys created or updated.
    pub mutated_keys: Vec<Key>,
    /// Keys deleted.
    pub deleted_keys: Vec<Key>,
}

/// The diff a committed transaction broadcasts to watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaTransactionBatch {
    /// Transaction id.
    pub id: String,
    /// Description supplied by the client.
    pub description: String,
    /// Entities created or updated, with their final contents.
    pub mutated_entities: Vec<MetaEntity>,
    /// Keys deleted.
    pub deleted_keys: Vec<Key>,
}

/// Snapshot sent once at the start of a watch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaTransactionInitialState {
    /// Every entity in the store, in key order.
    pub entities: Vec<MetaEntity>,
}

/// One message of a watch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchTransactionsResponse {
    /// Full snapshot; first message of a fresh subscription.
    InitialState(MetaTransactionInitialState),
    /// One committed transaction.
    Batch(MetaTransactionBatch),
}
