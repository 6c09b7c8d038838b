//! The configstore: schema, committed state, transactions and watches.

use crate::config::Config;
use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult, OperationError};
use crate::log::TransactionLog;
use crate::messages::{
    MetaGetEntityRequest, MetaGetEntityResponse, MetaListEntitiesRequest,
    MetaListEntitiesResponse, MetaTransaction, MetaTransactionRecord, MetaTransactionResult,
};
use crate::replica::WatchSource;
use crate::schema::{Schema, SchemaRegistry};
use crate::store::{CommittedState, EntityStore, IndexProbe};
use crate::trace::{TraceKind, TraceSink, Tracer, TracingSink};
use crate::transaction::{PendingTransaction, TransactionEngine};
use crate::types::{SequenceNumber, SubscriberId};
use crate::watch::{SubscriberState, Subscription, WatchBroadcaster};
use configstore_codec::{Key, PartitionId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// An in-memory, schema-typed entity store.
///
/// All methods take `&self`; share it between threads behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use configstore_core::{Config, Configstore, MetaTransaction, Schema};
///
/// let store = Configstore::open(Schema::load("schema.json")?, Config::default())?;
/// let mut watch = store.watch();
/// let result = store.apply_transaction(MetaTransaction::new("seed"))?;
/// assert!(result.committed);
/// ```
pub struct Configstore {
    registry: Arc<SchemaRegistry>,
    config: Config,
    tracer: Tracer,
    state: Arc<RwLock<CommittedState>>,
    broadcaster: Arc<WatchBroadcaster>,
    engine: TransactionEngine,
}

impl Configstore {
    /// Opens an empty store that reports trace events through `tracing`.
    pub fn open(schema: Schema, config: Config) -> CoreResult<Self> {
        Self::open_with_sink(schema, config, Arc::new(TracingSink))
    }

    /// Opens an empty store with a custom trace sink.
    pub fn open_with_sink(
        schema: Schema,
        config: Config,
        sink: Arc<dyn TraceSink>,
    ) -> CoreResult<Self> {
        Self::bootstrap(schema, config, sink, Vec::new())
    }

    /// Opens a store preloaded with `entities`.
    ///
    /// Every entity must be valid for its kind and appear once. Preloaded
    /// entities are not logged and produce no batch.
    pub fn bootstrap(
        schema: Schema,
        config: Config,
        sink: Arc<dyn TraceSink>,
        entities: Vec<MetaEntity>,
    ) -> CoreResult<Self> {
        let registry = Arc::new(SchemaRegistry::new(schema)?);
        let tracer = Tracer::new(sink, &config.operator_id);

        let mut store = EntityStore::new(registry.schema())
            .with_default_limit(config.default_list_limit as usize);
        for mut entity in entities {
            if entity.key.partition_id.namespace.is_empty() {
                entity.key.partition_id = PartitionId::new(config.default_namespace.as_str());
            }
            let key = entity.key.clone();
            registry
                .validate(entity.kind(), &entity)
                .map_err(|v| CoreError::invalid_operation(format!("initial entity {key}: {v}")))?;
            if store.put(entity).is_some() {
                return Err(CoreError::invalid_operation(format!(
                    "initial entity {key} given twice"
                )));
            }
        }
        let loaded = store.len();

        let state = Arc::new(RwLock::new(CommittedState {
            store: store.with_tracer(tracer.clone()),
            log: TransactionLog::new(config.max_retained_batches, config.max_retained_records),
        }));
        let broadcaster = Arc::new(WatchBroadcaster::new(
            config.subscriber_queue_capacity,
            tracer.clone(),
        ));
        let engine = TransactionEngine::new(
            Arc::clone(&registry),
            config.clone(),
            Arc::clone(&state),
            Arc::clone(&broadcaster),
            tracer.clone(),
        );

        info!(
            schema = %registry.schema().name,
            kinds = registry.schema().kinds.len(),
            entities = loaded,
            "configstore consistent"
        );
        tracer.emit(TraceKind::ConfigstoreConsistent);

        Ok(Self {
            registry,
            config,
            tracer,
            state,
            broadcaster,
            engine,
        })
    }

    /// The schema.
    pub fn schema(&self) -> &Schema {
        self.registry.schema()
    }

    /// Shared handle to the schema.
    pub fn shared_schema(&self) -> Arc<Schema> {
        self.registry.shared_schema()
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The tracer this store reports through.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Partition used for keys that name none.
    pub fn default_partition_id(&self) -> PartitionId {
        PartitionId::new(self.config.default_namespace.as_str())
    }

    /// Reads one entity from the committed state.
    pub fn get(&self, req: &MetaGetEntityRequest) -> Result<MetaGetEntityResponse, OperationError> {
        let state = self.state.read();
        self.engine.get(&state.store, &PendingTransaction::new(), req)
    }

    /// Lists one page of a kind from the committed state.
    pub fn list(
        &self,
        req: &MetaListEntitiesRequest,
    ) -> Result<MetaListEntitiesResponse, OperationError> {
        let state = self.state.read();
        self.engine.list(&state.store, &PendingTransaction::new(), req)
    }

    /// Looks entities up through a declared index.
    pub fn lookup(
        &self,
        kind: &str,
        index_name: &str,
        probe: &IndexProbe,
    ) -> CoreResult<Vec<MetaEntity>> {
        let state = self.state.read();
        let found = state.store.lookup(kind, index_name, probe)?;
        Ok(found.into_iter().cloned().collect())
    }

    /// Fetches one entity by key, without checking the kind.
    pub fn entity(&self, key: &Key) -> Option<MetaEntity> {
        let key = self.engine.normalize(key);
        self.state.read().store.get(&key).cloned()
    }

    /// Number of committed entities.
    pub fn len(&self) -> usize {
        self.state.read().store.len()
    }

    /// Returns true if no entity is committed.
    pub fn is_empty(&self) -> bool {
        self.state.read().store.is_empty()
    }

    /// Applies a transaction. See [`TransactionEngine::apply`].
    pub fn apply_transaction(
        &self,
        transaction: MetaTransaction,
    ) -> CoreResult<MetaTransactionResult> {
        self.engine.apply(transaction)
    }

    /// Transactions that have arrived and not finished.
    pub fn transaction_queue_count(&self) -> usize {
        self.engine.queue_count()
    }

    /// Returns true once a commit has corrupted the store.
    pub fn is_faulted(&self) -> bool {
        self.engine.is_faulted()
    }

    /// Sequence of the newest committed transaction.
    pub fn head_sequence(&self) -> SequenceNumber {
        self.engine.head()
    }

    /// Retained transaction records after `cursor`.
    pub fn transaction_records_since(&self, cursor: SequenceNumber) -> Vec<MetaTransactionRecord> {
        self.state.read().log.records_since(cursor)
    }

    /// Starts a watch: the full store, then every later commit.
    pub fn watch(&self) -> Subscription {
        let state = self.state.read();
        let entities = state.store.entities().cloned().collect();
        self.broadcaster.subscribe(entities, state.log.head())
    }

    /// Resumes a disconnected watch from its cursor.
    pub fn resume_watch(&self, id: SubscriberId) -> CoreResult<Subscription> {
        let state = self.state.read();
        self.broadcaster.reconnect(id, &state.log)
    }

    /// Closes a watch.
    pub fn unsubscribe(&self, id: SubscriberId) -> CoreResult<()> {
        self.broadcaster.unsubscribe(id)
    }

    /// Closes every watch. Returns how many were closed.
    pub fn close_watches(&self) -> usize {
        self.broadcaster.close_all()
    }

    /// State of a registered watch.
    pub fn subscriber_state(&self, id: SubscriberId) -> Option<SubscriberState> {
        self.broadcaster.subscriber_state(id)
    }

    /// Number of registered watches.
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }
}

impl WatchSource for Configstore {
    fn watch(&self) -> Subscription {
        Configstore::watch(self)
    }

    fn resume_watch(&self, id: SubscriberId) -> CoreResult<Subscription> {
        Configstore::resume_watch(self, id)
    }
}

impl std::fmt::Debug for Configstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configstore")
            .field("schema", &self.registry.schema().name)
            .field("engine", &self.engine)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
