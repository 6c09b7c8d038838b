//! Transaction engine.

use crate::config::Config;
use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult, OperationError, SchemaViolation};
use crate::messages::{
    MetaCreateEntityRequest, MetaCreateEntityResponse, MetaDeleteEntityRequest,
    MetaDeleteEntityResponse, MetaGetEntityRequest, MetaGetEntityResponse,
    MetaListEntitiesRequest, MetaListEntitiesResponse, MetaOperation, MetaOperationResult,
    MetaOperationResultError, MetaTransaction, MetaTransactionBatch, MetaTransactionRecord,
    MetaTransactionResult, MetaUpdateEntityRequest, MetaUpdateEntityResponse,
};
use crate::schema::SchemaRegistry;
use crate::store::{page, CommittedState, EntityStore, StoreDiff};
use crate::trace::{TraceKind, Tracer};
use crate::transaction::pending::PendingTransaction;
use crate::types::{transaction_id_string, SequenceNumber};
use crate::watch::WatchBroadcaster;
use configstore_codec::{Key, PartitionId, PathElement, PathId, Timestamp};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Arrival order of transactions waiting to commit.
#[derive(Debug, Default)]
struct CommitQueue {
    next_ticket: u64,
    serving: u64,
}

/// The right to commit; hands the turn to the next ticket when dropped.
struct CommitTurn<'a> {
    engine: &'a TransactionEngine,
}

impl Drop for CommitTurn<'_> {
    fn drop(&mut self) {
        self.engine.commit_queue.lock().serving += 1;
        self.engine.commit_turn.notify_all();
    }
}

/// Applies transactions one at a time against the committed store.
///
/// ## Single-writer guarantee
///
/// Transactions take a ticket on arrival and commit strictly in ticket
/// order, one after another.
/// Operations are evaluated under the store read lock against a
/// [`PendingTransaction`] overlay; only a fully successful transaction takes
/// the write lock, and only for as long as it takes to apply its diff, log
/// it and hand the batch to the broadcaster.
///
/// If applying a diff ever fails the store invariants, the engine is
/// faulted and refuses every later transaction.
pub struct TransactionEngine {
    registry: Arc<SchemaRegistry>,
    config: Config,
    state: Arc<RwLock<CommittedState>>,
    broadcaster: Arc<WatchBroadcaster>,
    tracer: Tracer,
    commit_queue: Mutex<CommitQueue>,
    commit_turn: Condvar,
    queued: AtomicUsize,
    faulted: AtomicBool,
    instance: Uuid,
}

impl TransactionEngine {
    pub(crate) fn new(
        registry: Arc<SchemaRegistry>,
        config: Config,
        state: Arc<RwLock<CommittedState>>,
        broadcaster: Arc<WatchBroadcaster>,
        tracer: Tracer,
    ) -> Self {
        Self {
            registry,
            config,
            state,
            broadcaster,
            tracer,
            commit_queue: Mutex::new(CommitQueue::default()),
            commit_turn: Condvar::new(),
            queued: AtomicUsize::new(0),
            faulted: AtomicBool::new(false),
            instance: Uuid::new_v4(),
        }
    }

    /// Transactions that have arrived and not yet finished.
    pub fn queue_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Returns true once a commit has failed the store invariants.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Applies a transaction all-or-nothing.
    ///
    /// Operation failures do not make this call fail: they are reported in
    /// the result, which then has `committed == false` and one entry per
    /// operation describing what each would have done.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreFaulted`] if the engine is faulted.
    pub fn apply(&self, transaction: MetaTransaction) -> CoreResult<MetaTransactionResult> {
        let submitted = Timestamp::now();
        let queued = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracer
            .record(self.tracer.event(TraceKind::TransactionArrived).queue_count(queued));

        let result = self.apply_queued(transaction, submitted);

        let remaining = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.tracer.record(
            self.tracer
                .event(TraceKind::TransactionFinishedProcessing)
                .queue_count(remaining),
        );
        result
    }

    fn lock_commit(&self) -> CommitTurn<'_> {
        let mut queue = self.commit_queue.lock();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        while queue.serving != ticket {
            let waited = self
                .commit_turn
                .wait_for(&mut queue, self.config.stall_threshold);
            if waited.timed_out() && queue.serving != ticket {
                let queued = self.queue_count();
                MutexGuard::unlocked(&mut queue, || {
                    warn!(queued, ticket, "transaction stalled waiting for its commit turn");
                    self.tracer
                        .record(self.tracer.event(TraceKind::TransactionStalled).queue_count(queued));
                });
            }
        }
        CommitTurn { engine: self }
    }

    fn apply_queued(
        &self,
        transaction: MetaTransaction,
        submitted: Timestamp,
    ) -> CoreResult<MetaTransactionResult> {
        let _commit = self.lock_commit();
        if self.is_faulted() {
            return Err(CoreError::StoreFaulted);
        }

        let mut pending = PendingTransaction::new();
        let mut results = Vec::with_capacity(transaction.operations.len());
        let mut failed = false;
        {
            let state = self.state.read();
            for operation in &transaction.operations {
                match self.evaluate(&state.store, &mut pending, operation) {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        failed = true;
                        results.push(MetaOperationResult::Error((&err).into()));
                    }
                }
            }
        }

        if failed {
            debug!(
                description = %transaction.description,
                operations = results.len(),
                "transaction rolled back"
            );
            return Ok(MetaTransactionResult {
                operation_results: results,
                committed: false,
                transaction_id: None,
            });
        }

        let mut state = self.state.write();
        let diff = pending.into_diff(&state.store);
        if diff.is_empty() {
            debug!(
                description = %transaction.description,
                operations = results.len(),
                "transaction committed without changes"
            );
            return Ok(MetaTransactionResult {
                operation_results: results,
                committed: true,
                transaction_id: None,
            });
        }

        if let Err(err) = state.store.apply(&diff) {
            self.faulted.store(true, Ordering::SeqCst);
            error!(error = %err, "commit failed store invariants, refusing further transactions");
            let internal = MetaOperationResultError::from(&OperationError::internal(err.to_string()));
            for (result, operation) in results.iter_mut().zip(&transaction.operations) {
                if operation.is_write() {
                    *result = MetaOperationResult::Error(internal.clone());
                }
            }
            return Ok(MetaTransactionResult {
                operation_results: results,
                committed: false,
                transaction_id: None,
            });
        }

        let sequence = state.log.next_sequence();
        let id = transaction_id_string(sequence, &self.instance);
        let StoreDiff { mutated, deleted } = diff;
        let record = MetaTransactionRecord {
            id: id.clone(),
            date_submitted: submitted,
            date_created: Timestamp::now(),
            description: transaction.description.clone(),
            mutated_keys: mutated.iter().map(|e| e.key.clone()).collect(),
            deleted_keys: deleted.clone(),
        };
        let batch = Arc::new(MetaTransactionBatch {
            id: id.clone(),
            description: transaction.description,
            mutated_entities: mutated,
            deleted_keys: deleted,
        });
        state.log.append(record, Arc::clone(&batch));
        self.broadcaster.publish(sequence, &batch);
        self.broadcaster.reap(&state.log);
        drop(state);

        self.trace_commit(&batch);
        info!(
            transaction = %id,
            %sequence,
            mutated = batch.mutated_entities.len(),
            deleted = batch.deleted_keys.len(),
            "transaction committed"
        );
        Ok(MetaTransactionResult {
            operation_results: results,
            committed: true,
            transaction_id: Some(id),
        })
    }

    fn trace_commit(&self, batch: &MetaTransactionBatch) {
        let t = &self.tracer;
        for entity in &batch.mutated_entities {
            t.record(
                t.event(TraceKind::TransactionMutatedEntityKey)
                    .transaction(batch.id.as_str())
                    .key(entity.key.clone()),
            );
        }
        for key in &batch.deleted_keys {
            t.record(
                t.event(TraceKind::TransactionDeletedEntityKey)
                    .transaction(batch.id.as_str())
                    .key(key.clone()),
            );
        }
    }

    fn evaluate(
        &self,
        store: &EntityStore,
        pending: &mut PendingTransaction,
        operation: &MetaOperation,
    ) -> Result<MetaOperationResult, OperationError> {
        Ok(match operation {
            MetaOperation::List(req) => MetaOperationResult::List(self.list(store, pending, req)?),
            MetaOperation::Get(req) => MetaOperationResult::Get(self.get(store, pending, req)?),
            MetaOperation::Create(req) => {
                MetaOperationResult::Create(self.create(store, pending, req)?)
            }
            MetaOperation::Update(req) => {
                MetaOperationResult::Update(self.update(store, pending, req)?)
            }
            MetaOperation::Delete(req) => {
                MetaOperationResult::Delete(self.delete(store, pending, req)?)
            }
        })
    }

    /// Fills in the default partition for keys that name none.
    pub(crate) fn normalize(&self, key: &Key) -> Key {
        if key.partition_id.namespace.is_empty() {
            key.clone()
                .with_partition(PartitionId::new(self.config.default_namespace.as_str()))
        } else {
            key.clone()
        }
    }

    pub(crate) fn list(
        &self,
        store: &EntityStore,
        pending: &PendingTransaction,
        req: &MetaListEntitiesRequest,
    ) -> Result<MetaListEntitiesResponse, OperationError> {
        if self.registry.kind(&req.kind_name).is_none() {
            return Err(SchemaViolation::UnknownKind {
                kind: req.kind_name.clone(),
            }
            .into());
        }
        let after = req.start.decode()?;
        let limit = match req.limit {
            0 => self.config.default_list_limit.max(1),
            n => n,
        };
        let (entities, more) = pending.list(store, &req.kind_name, after.as_ref(), limit as usize);
        Ok(page(entities, more)?)
    }

    pub(crate) fn get(
        &self,
        store: &EntityStore,
        pending: &PendingTransaction,
        req: &MetaGetEntityRequest,
    ) -> Result<MetaGetEntityResponse, OperationError> {
        let key = self.normalize(&req.key);
        self.registry.validate_key(&req.kind_name, &key)?;
        let entity = pending
            .get(store, &key)
            .cloned()
            .ok_or_else(|| OperationError::not_found(&key))?;
        Ok(MetaGetEntityResponse { entity })
    }

    fn create(
        &self,
        store: &EntityStore,
        pending: &mut PendingTransaction,
        req: &MetaCreateEntityRequest,
    ) -> Result<MetaCreateEntityResponse, OperationError> {
        let mut entity = req.entity.clone();
        entity.key = if entity.key.path.is_empty() {
            Key::top_level(
                entity.key.partition_id.clone(),
                PathElement::incomplete(req.kind_name.as_str()),
            )
        } else {
            entity.key
        };
        entity.key = self.normalize(&entity.key);
        if entity.key.is_allocatable() {
            entity.key = allocate_key(store, pending, &entity.key);
        }

        self.registry.validate_key(&req.kind_name, &entity.key)?;
        if pending.contains(store, &entity.key) {
            return Err(OperationError::already_exists(&entity.key));
        }
        self.registry.apply_defaults(&req.kind_name, &mut entity);
        self.registry.validate(&req.kind_name, &entity)?;

        pending.put(entity.clone());
        Ok(MetaCreateEntityResponse { entity })
    }

    fn update(
        &self,
        store: &EntityStore,
        pending: &mut PendingTransaction,
        req: &MetaUpdateEntityRequest,
    ) -> Result<MetaUpdateEntityResponse, OperationError> {
        let mut entity = req.entity.clone();
        entity.key = self.normalize(&entity.key);
        let kind = entity.kind().to_string();

        self.registry.validate_key(&kind, &entity.key)?;
        let previous = pending
            .get(store, &entity.key)
            .ok_or_else(|| OperationError::not_found(&entity.key))?;
        self.registry.validate(&kind, &entity)?;
        self.registry.check_readonly(&kind, previous, &entity)?;

        pending.put(entity.clone());
        Ok(MetaUpdateEntityResponse { entity })
    }

    fn delete(
        &self,
        store: &EntityStore,
        pending: &mut PendingTransaction,
        req: &MetaDeleteEntityRequest,
    ) -> Result<MetaDeleteEntityResponse, OperationError> {
        let key = self.normalize(&req.key);
        self.registry.validate_key(&req.kind_name, &key)?;
        let entity = pending
            .get(store, &key)
            .cloned()
            .unwrap_or_else(|| MetaEntity::empty(key.clone()));
        pending.delete(&key);
        Ok(MetaDeleteEntityResponse { entity })
    }

    /// Head of the transaction log.
    pub fn head(&self) -> SequenceNumber {
        self.state.read().log.head()
    }
}

/// Names the incomplete last element of `key` with a fresh UUID that no
/// committed or pending entity uses.
fn allocate_key(store: &EntityStore, pending: &PendingTransaction, key: &Key) -> Key {
    let mut candidate = key.clone();
    loop {
        let name = Uuid::new_v4().simple().to_string();
        if let Some(last) = candidate.path.last_mut() {
            last.id = Some(PathId::Name(name));
        }
        if !pending.contains(store, &candidate) {
            return candidate;
        }
    }
}

impl std::fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("queued", &self.queue_count())
            .field("faulted", &self.is_faulted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::TransactionLog;
    use crate::messages::{MetaCreateEntityRequest, WatchTransactionsResponse};
    use crate::schema::{Schema, SchemaField, SchemaKind};
    use crate::trace::MemoryTraceSink;
    use configstore_codec::ValueType;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Harness {
        sink: Arc<MemoryTraceSink>,
        engine: Arc<TransactionEngine>,
        broadcaster: Arc<WatchBroadcaster>,
    }

    fn harness(config: Config) -> Harness {
        let mut schema = Schema::default();
        schema.kinds.insert(
            "User".into(),
            SchemaKind {
                fields: vec![SchemaField::new(1, "name", ValueType::String)],
                ..SchemaKind::default()
            },
        );
        let registry = Arc::new(SchemaRegistry::new(schema).unwrap());
        let sink = Arc::new(MemoryTraceSink::new());
        let tracer = Tracer::new(sink.clone(), "test");
        let state = Arc::new(RwLock::new(CommittedState {
            store: EntityStore::new(registry.schema()),
            log: TransactionLog::new(16, 16),
        }));
        let broadcaster = Arc::new(WatchBroadcaster::new(8, tracer.clone()));
        let engine = TransactionEngine::new(
            registry,
            config,
            state,
            Arc::clone(&broadcaster),
            tracer,
        );
        Harness {
            sink,
            engine: Arc::new(engine),
            broadcaster,
        }
    }

    fn create_user(name: &str) -> MetaTransaction {
        let key = Key::top_level(PartitionId::new("default"), PathElement::with_name("User", name));
        MetaTransaction::new(name).with(MetaOperation::Create(MetaCreateEntityRequest {
            kind_name: "User".into(),
            entity: MetaEntity::empty(key).with_value(1, name),
        }))
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn concurrent_writers_commit_in_arrival_order() {
        let h = harness(Config::default().stall_threshold(Duration::from_millis(5)));
        let mut watch = h.broadcaster.subscribe(Vec::new(), SequenceNumber::ZERO);
        watch.try_recv().unwrap();

        let turn = h.engine.lock_commit();
        let spawn_writer = |name: &'static str| {
            let engine = Arc::clone(&h.engine);
            thread::spawn(move || engine.apply(create_user(name)).unwrap())
        };

        let first = spawn_writer("first");
        wait_until(|| h.engine.commit_queue.lock().next_ticket == 2);
        let second = spawn_writer("second");
        wait_until(|| h.engine.commit_queue.lock().next_ticket == 3);
        assert_eq!(h.engine.queue_count(), 2);

        wait_until(|| {
            h.sink.events().iter().any(|e| {
                e.kind == TraceKind::TransactionStalled
                    && e.remaining_transaction_queue_count == Some(2)
            })
        });
        drop(turn);

        let first = first.join().unwrap();
        let second = second.join().unwrap();
        assert!(first.committed && second.committed);
        assert_eq!(h.engine.queue_count(), 0);
        assert_eq!(h.engine.head(), SequenceNumber::new(2));

        let order: Vec<_> = (0..2)
            .map(|_| match watch.try_recv().unwrap() {
                WatchTransactionsResponse::Batch(b) => b.description,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(order, vec!["first", "second"]);
        assert_eq!(h.sink.count(TraceKind::TransactionArrived), 2);
        assert_eq!(h.sink.count(TraceKind::TransactionFinishedProcessing), 2);
    }

    #[test]
    fn uncontended_commit_does_not_stall() {
        let h = harness(Config::default().stall_threshold(Duration::from_millis(5)));
        for name in ["a", "b", "c"] {
            assert!(h.engine.apply(create_user(name)).unwrap().committed);
        }
        assert_eq!(h.sink.count(TraceKind::TransactionStalled), 0);
        assert_eq!(h.engine.commit_queue.lock().serving, 3);
    }
}
