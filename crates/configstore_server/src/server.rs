//! The meta server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::messages::{
    ErrorResponse, GetDefaultPartitionIdResponse, GetSchemaResponse,
    GetTransactionQueueCountResponse, MetaRequest, MetaResponse,
};
use configstore_codec::{from_wire, to_wire};
use configstore_core::{
    Configstore, CoreResult, MetaCreateEntityRequest, MetaCreateEntityResponse,
    MetaDeleteEntityRequest, MetaDeleteEntityResponse, MetaGetEntityRequest,
    MetaGetEntityResponse, MetaListEntitiesRequest, MetaListEntitiesResponse, MetaTransaction,
    MetaTransactionResult, MetaUpdateEntityRequest, MetaUpdateEntityResponse, SubscriberId,
    Subscription, TraceKind, WatchSource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The meta server.
///
/// Serves one [`Configstore`]: schema and partition queries, entity reads
/// and writes, transactions and watch streams. Requests arrive either as
/// typed calls or as CBOR frames through [`MetaServer::handle_frame`].
///
/// # Example
///
/// ```
/// use configstore_core::{Config, Configstore, Schema};
/// use configstore_server::{MetaServer, ServerConfig};
/// use std::sync::Arc;
///
/// let store = Arc::new(Configstore::open(Schema::default(), Config::default()).unwrap());
/// let server = MetaServer::new(ServerConfig::default(), store);
/// assert_eq!(server.get_default_partition_id().unwrap().partition_id.namespace, "default");
/// ```
pub struct MetaServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    shutting_down: AtomicBool,
}

impl MetaServer {
    /// Creates a server for `store` and announces its ports.
    pub fn new(config: ServerConfig, store: Arc<Configstore>) -> Self {
        let tracer = store.tracer().clone();
        tracer.record(
            tracer
                .event(TraceKind::ServerStartupGrpcPort)
                .port(config.grpc_addr.port()),
        );
        info!(addr = %config.grpc_addr, "meta service listening");
        if let Some(http) = config.http_addr {
            tracer.record(tracer.event(TraceKind::ServerStartupHttpPort).port(http.port()));
            info!(addr = %http, "http surface listening");
        }

        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self {
            handler,
            context,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The served store.
    pub fn store(&self) -> &Arc<Configstore> {
        &self.context.store
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns true once [`MetaServer::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn check_running(&self) -> ServerResult<()> {
        if self.is_shutting_down() {
            return Err(ServerError::Unavailable("server is shutting down".into()));
        }
        Ok(())
    }

    /// Returns the schema.
    pub fn get_schema(&self) -> ServerResult<GetSchemaResponse> {
        self.check_running()?;
        Ok(self.handler.handle_get_schema())
    }

    /// Returns the default partition.
    pub fn get_default_partition_id(&self) -> ServerResult<GetDefaultPartitionIdResponse> {
        self.check_running()?;
        Ok(self.handler.handle_get_default_partition_id())
    }

    /// Lists one page of a kind.
    pub fn meta_list_entities(
        &self,
        request: MetaListEntitiesRequest,
    ) -> ServerResult<MetaListEntitiesResponse> {
        self.check_running()?;
        self.handler.handle_list(request)
    }

    /// Fetches one entity.
    pub fn meta_get_entity(
        &self,
        request: MetaGetEntityRequest,
    ) -> ServerResult<MetaGetEntityResponse> {
        self.check_running()?;
        self.handler.handle_get(request)
    }

    /// Creates one entity.
    pub fn meta_create_entity(
        &self,
        request: MetaCreateEntityRequest,
    ) -> ServerResult<MetaCreateEntityResponse> {
        self.check_running()?;
        self.handler.handle_create(request)
    }

    /// Replaces one entity.
    pub fn meta_update_entity(
        &self,
        request: MetaUpdateEntityRequest,
    ) -> ServerResult<MetaUpdateEntityResponse> {
        self.check_running()?;
        self.handler.handle_update(request)
    }

    /// Deletes one entity.
    pub fn meta_delete_entity(
        &self,
        request: MetaDeleteEntityRequest,
    ) -> ServerResult<MetaDeleteEntityResponse> {
        self.check_running()?;
        self.handler.handle_delete(request)
    }

    /// Applies a transaction.
    pub fn apply_transaction(
        &self,
        transaction: MetaTransaction,
    ) -> ServerResult<MetaTransactionResult> {
        self.check_running()?;
        self.handler.handle_apply_transaction(transaction)
    }

    /// Returns the number of queued transactions.
    pub fn get_transaction_queue_count(&self) -> ServerResult<GetTransactionQueueCountResponse> {
        self.check_running()?;
        Ok(self.handler.handle_get_transaction_queue_count())
    }

    /// Opens a watch stream.
    pub fn watch_transactions(&self) -> ServerResult<Subscription> {
        self.check_running()?;
        Ok(self.context.store.watch())
    }

    /// Resumes a watch stream from the subscriber's cursor.
    pub fn resume_watch(&self, id: SubscriberId) -> ServerResult<Subscription> {
        self.check_running()?;
        Ok(self.context.store.resume_watch(id)?)
    }

    /// Closes a watch stream.
    pub fn cancel_watch(&self, id: SubscriberId) -> ServerResult<()> {
        Ok(self.context.store.unsubscribe(id)?)
    }

    /// Handles a request message (dispatches to the matching call).
    ///
    /// Failures are returned as [`MetaResponse::Error`].
    pub fn handle_message(&self, request: MetaRequest) -> MetaResponse {
        let result = match request {
            MetaRequest::GetSchema => self.get_schema().map(MetaResponse::Schema),
            MetaRequest::GetDefaultPartitionId => self
                .get_default_partition_id()
                .map(MetaResponse::DefaultPartitionId),
            MetaRequest::ListEntities(req) => {
                self.meta_list_entities(req).map(MetaResponse::ListEntities)
            }
            MetaRequest::GetEntity(req) => self.meta_get_entity(req).map(MetaResponse::GetEntity),
            MetaRequest::CreateEntity(req) => {
                self.meta_create_entity(req).map(MetaResponse::CreateEntity)
            }
            MetaRequest::UpdateEntity(req) => {
                self.meta_update_entity(req).map(MetaResponse::UpdateEntity)
            }
            MetaRequest::DeleteEntity(req) => {
                self.meta_delete_entity(req).map(MetaResponse::DeleteEntity)
            }
            MetaRequest::ApplyTransaction(tx) => {
                self.apply_transaction(tx).map(MetaResponse::Transaction)
            }
            MetaRequest::GetTransactionQueueCount => self
                .get_transaction_queue_count()
                .map(MetaResponse::TransactionQueueCount),
            MetaRequest::CancelWatch { subscriber_id } => self
                .cancel_watch(SubscriberId::new(subscriber_id))
                .map(|()| MetaResponse::WatchCancelled),
        };
        result.unwrap_or_else(|err| error_response(&err))
    }

    /// Decodes a request frame, handles it and encodes the reply.
    ///
    /// An undecodable frame is answered with an encoded error response.
    pub fn handle_frame(&self, frame: &[u8]) -> ServerResult<Vec<u8>> {
        let response = match from_wire::<MetaRequest>(frame) {
            Ok(request) => self.handle_message(request),
            Err(err) => {
                warn!(error = %err, len = frame.len(), "undecodable request frame");
                error_response(&ServerError::InvalidRequest(err.to_string()))
            }
        };
        to_wire(&response).map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Stops taking requests and closes every watch stream.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self.context.store.close_watches();
        info!(closed_watches = closed, "meta server shutting down");
        self.context
            .store
            .tracer()
            .emit(TraceKind::ServerGracefulShutdown);
    }
}

impl WatchSource for MetaServer {
    fn watch(&self) -> Subscription {
        self.context.store.watch()
    }

    fn resume_watch(&self, id: SubscriberId) -> CoreResult<Subscription> {
        self.context.store.resume_watch(id)
    }
}

fn error_response(err: &ServerError) -> MetaResponse {
    if err.is_server_error() {
        warn!(error = %err, "request failed");
    }
    MetaResponse::Error(ErrorResponse {
        status: err.status(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStatus;
    use configstore_core::schema::{Schema, SchemaField, SchemaKind};
    use configstore_core::{Config, MemoryTraceSink, ValueType};

    fn create_server(config: ServerConfig) -> (Arc<MemoryTraceSink>, MetaServer) {
        let mut schema = Schema::default();
        schema.kinds.insert(
            "User".into(),
            SchemaKind {
                fields: vec![SchemaField::new(1, "name", ValueType::String)],
                ..SchemaKind::default()
            },
        );
        let sink = Arc::new(MemoryTraceSink::new());
        let store =
            Configstore::open_with_sink(schema, Config::default(), sink.clone()).unwrap();
        (sink, MetaServer::new(config, Arc::new(store)))
    }

    #[test]
    fn startup_announces_ports() {
        let config = ServerConfig::default().with_http_addr("127.0.0.1:13390".parse().unwrap());
        let (sink, _server) = create_server(config);
        let ports: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TraceKind::ServerStartupGrpcPort | TraceKind::ServerStartupHttpPort
                )
            })
            .map(|e| e.port)
            .collect();
        assert_eq!(ports, vec![Some(13389), Some(13390)]);
    }

    #[test]
    fn message_dispatch() {
        let (_, server) = create_server(ServerConfig::default());
        let response = server.handle_message(MetaRequest::GetSchema);
        assert!(matches!(response, MetaResponse::Schema(_)));

        let response = server.handle_message(MetaRequest::CancelWatch { subscriber_id: 99 });
        assert_eq!(response.error().map(|e| e.status), Some(ErrorStatus::NotFound));
    }

    #[test]
    fn frame_round_trip() {
        let (_, server) = create_server(ServerConfig::default());
        let frame = to_wire(&MetaRequest::GetTransactionQueueCount).unwrap();
        let reply: MetaResponse = from_wire(&server.handle_frame(&frame).unwrap()).unwrap();
        assert_eq!(
            reply,
            MetaResponse::TransactionQueueCount(GetTransactionQueueCountResponse { count: 0 })
        );
    }

    #[test]
    fn garbage_frame_gets_error_reply() {
        let (_, server) = create_server(ServerConfig::default());
        let reply: MetaResponse =
            from_wire(&server.handle_frame(&[0xff, 0x00, 0x13]).unwrap()).unwrap();
        assert_eq!(
            reply.error().map(|e| e.status),
            Some(ErrorStatus::InvalidArgument)
        );
    }

    #[test]
    fn shutdown_rejects_requests_and_closes_watches() {
        let (sink, server) = create_server(ServerConfig::default());
        let watch = server.watch_transactions().unwrap();
        assert_eq!(server.store().subscriber_count(), 1);

        server.shutdown();
        server.shutdown();
        assert_eq!(sink.count(TraceKind::ServerGracefulShutdown), 1);
        assert_eq!(server.store().subscriber_count(), 0);
        assert!(matches!(
            server.get_schema(),
            Err(ServerError::Unavailable(_))
        ));
        assert!(server.watch_transactions().is_err());
        drop(watch);
    }
}
