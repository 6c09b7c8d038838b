//! Request handlers for the meta service.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::messages::{
    GetDefaultPartitionIdResponse, GetSchemaResponse, GetTransactionQueueCountResponse,
};
use configstore_core::{
    Configstore, MetaCreateEntityRequest, MetaCreateEntityResponse, MetaDeleteEntityRequest,
    MetaDeleteEntityResponse, MetaGetEntityRequest, MetaGetEntityResponse,
    MetaListEntitiesRequest, MetaListEntitiesResponse, MetaOperation, MetaOperationResult,
    MetaTransaction, MetaTransactionResult, MetaUpdateEntityRequest, MetaUpdateEntityResponse,
};
use std::sync::Arc;
use tracing::debug;

/// Context shared by every handler.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The store served.
    pub store: Arc<Configstore>,
}

impl HandlerContext {
    /// Creates a handler context.
    pub fn new(config: ServerConfig, store: Arc<Configstore>) -> Self {
        Self { config, store }
    }
}

/// Handler for meta requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the schema.
    pub fn handle_get_schema(&self) -> GetSchemaResponse {
        GetSchemaResponse {
            schema: self.context.store.schema().clone(),
        }
    }

    /// Returns the default partition.
    pub fn handle_get_default_partition_id(&self) -> GetDefaultPartitionIdResponse {
        GetDefaultPartitionIdResponse {
            partition_id: self.context.store.default_partition_id(),
        }
    }

    /// Lists a page from the committed state.
    ///
    /// A zero limit uses the store's default page size; any limit is capped
    /// at the server's maximum.
    pub fn handle_list(
        &self,
        mut request: MetaListEntitiesRequest,
    ) -> ServerResult<MetaListEntitiesResponse> {
        let requested = match request.limit {
            0 => self.context.store.config().default_list_limit,
            n => n,
        };
        request.limit = requested.min(self.context.config.max_list_limit).max(1);
        Ok(self.context.store.list(&request)?)
    }

    /// Reads one entity from the committed state.
    pub fn handle_get(&self, request: MetaGetEntityRequest) -> ServerResult<MetaGetEntityResponse> {
        Ok(self.context.store.get(&request)?)
    }

    /// Creates one entity.
    pub fn handle_create(
        &self,
        request: MetaCreateEntityRequest,
    ) -> ServerResult<MetaCreateEntityResponse> {
        match self.single(MetaOperation::Create(request))? {
            MetaOperationResult::Create(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    /// Replaces one entity.
    pub fn handle_update(
        &self,
        request: MetaUpdateEntityRequest,
    ) -> ServerResult<MetaUpdateEntityResponse> {
        match self.single(MetaOperation::Update(request))? {
            MetaOperationResult::Update(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    /// Deletes one entity.
    pub fn handle_delete(
        &self,
        request: MetaDeleteEntityRequest,
    ) -> ServerResult<MetaDeleteEntityResponse> {
        match self.single(MetaOperation::Delete(request))? {
            MetaOperationResult::Delete(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    /// Applies a transaction.
    pub fn handle_apply_transaction(
        &self,
        transaction: MetaTransaction,
    ) -> ServerResult<MetaTransactionResult> {
        let max = self.context.config.max_transaction_operations;
        if transaction.operations.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many operations: {} > {}",
                transaction.operations.len(),
                max
            )));
        }
        Ok(self.context.store.apply_transaction(transaction)?)
    }

    /// Returns the queue gauge.
    pub fn handle_get_transaction_queue_count(&self) -> GetTransactionQueueCountResponse {
        let count = self.context.store.transaction_queue_count();
        GetTransactionQueueCountResponse {
            count: u32::try_from(count).unwrap_or(u32::MAX),
        }
    }

    /// Runs one operation as its own transaction and surfaces its error.
    fn single(&self, operation: MetaOperation) -> ServerResult<MetaOperationResult> {
        let transaction = MetaTransaction::new("").with(operation);
        let mut result = self.context.store.apply_transaction(transaction)?;
        let outcome = result
            .operation_results
            .pop()
            .ok_or_else(|| ServerError::Internal("transaction returned no result".into()))?;
        match outcome {
            MetaOperationResult::Error(err) => {
                debug!(code = ?err.code, message = %err.error_message, "single operation failed");
                Err(err.into())
            }
            ok => Ok(ok),
        }
    }
}

fn unexpected(result: &MetaOperationResult) -> ServerError {
    ServerError::Internal(format!("unexpected operation result {result:?}"))
}
