//! Request and response envelopes of the meta service.

use crate::error::ErrorStatus;
use configstore_core::schema::Schema;
use configstore_core::{
    MetaCreateEntityRequest, MetaCreateEntityResponse, MetaDeleteEntityRequest,
    MetaDeleteEntityResponse, MetaGetEntityRequest, MetaGetEntityResponse,
    MetaListEntitiesRequest, MetaListEntitiesResponse, MetaTransaction, MetaTransactionResult,
    MetaUpdateEntityRequest, MetaUpdateEntityResponse, PartitionId,
};
use serde::{Deserialize, Serialize};

/// The store's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSchemaResponse {
    /// Schema definition.
    pub schema: Schema,
}

/// The partition unqualified keys are placed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDefaultPartitionIdResponse {
    /// Default partition.
    pub partition_id: PartitionId,
}

/// Transactions currently queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTransactionQueueCountResponse {
    /// Arrived and not yet finished.
    pub count: u32,
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub status: ErrorStatus,
    /// Human-readable message.
    pub message: String,
}

/// A request to the meta service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaRequest {
    /// Fetch the schema.
    GetSchema,
    /// Fetch the default partition.
    GetDefaultPartitionId,
    /// List a page of entities.
    ListEntities(MetaListEntitiesRequest),
    /// Fetch one entity.
    GetEntity(MetaGetEntityRequest),
    /// Create one entity.
    CreateEntity(MetaCreateEntityRequest),
    /// Update one entity.
    UpdateEntity(MetaUpdateEntityRequest),
    /// Delete one entity.
    DeleteEntity(MetaDeleteEntityRequest),
    /// Apply a transaction.
    ApplyTransaction(MetaTransaction),
    /// Read the queue gauge.
    GetTransactionQueueCount,
    /// Close a watch.
    CancelWatch {
        /// Subscriber to close.
        subscriber_id: u64,
    },
}

/// A reply from the meta service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaResponse {
    /// Reply to [`MetaRequest::GetSchema`].
    Schema(GetSchemaResponse),
    /// Reply to [`MetaRequest::GetDefaultPartitionId`].
    DefaultPartitionId(GetDefaultPartitionIdResponse),
    /// Reply to [`MetaRequest::ListEntities`].
    ListEntities(MetaListEntitiesResponse),
    /// Reply to [`MetaRequest::GetEntity`].
    GetEntity(MetaGetEntityResponse),
    /// Reply to [`MetaRequest::CreateEntity`].
    CreateEntity(MetaCreateEntityResponse),
    /// Reply to [`MetaRequest::UpdateEntity`].
    UpdateEntity(MetaUpdateEntityResponse),
    /// Reply to [`MetaRequest::DeleteEntity`].
    DeleteEntity(MetaDeleteEntityResponse),
    /// Reply to [`MetaRequest::ApplyTransaction`].
    Transaction(MetaTransactionResult),
    /// Reply to [`MetaRequest::GetTransactionQueueCount`].
    TransactionQueueCount(GetTransactionQueueCountResponse),
    /// Reply to [`MetaRequest::CancelWatch`].
    WatchCancelled,
    /// The request failed.
    Error(ErrorResponse),
}

impl MetaResponse {
    /// Returns the error, if this reply is one.
    pub fn error(&self) -> Option<&ErrorResponse> {
        match self {
            MetaResponse::Error(e) => Some(e),
            _ => None,
        }
    }
}
