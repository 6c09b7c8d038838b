//! Client-side mirror of a configstore.
//!
//! A [`Replica`] consumes a watch stream into its own [`EntityStore`] and
//! answers reads locally. When the stream ends it resumes from its cursor;
//! if the server no longer has the batches it needs, it subscribes again
//! and rebuilds from the fresh initial state.

use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult};
use crate::messages::{MetaListEntitiesResponse, WatchTransactionsResponse};
use crate::schema::Schema;
use crate::store::{EntityStore, IndexProbe, StoreDiff};
use crate::trace::{TraceKind, Tracer};
use crate::types::SubscriberId;
use crate::watch::{Subscription, TryRecvError};
use configstore_codec::{CodecResult, Cursor, Key};
use std::sync::Arc;
use tracing::{debug, warn};

/// Something a replica can watch.
pub trait WatchSource: Send + Sync {
    /// Starts a fresh subscription.
    fn watch(&self) -> Subscription;

    /// Resumes an existing subscriber from its cursor.
    fn resume_watch(&self, id: SubscriberId) -> CoreResult<Subscription>;
}

/// Local, read-only copy of a watched store.
pub struct Replica<S: WatchSource> {
    source: Arc<S>,
    mirror: EntityStore,
    subscription: Option<Subscription>,
    subscriber: SubscriberId,
    synced: bool,
    tracer: Tracer,
}

impl<S: WatchSource> Replica<S> {
    /// Subscribes to `source` and prepares an empty mirror with the indexes of `schema`.
    pub fn connect(source: Arc<S>, schema: &Schema, tracer: Tracer) -> Self {
        let subscription = source.watch();
        Self {
            subscriber: subscription.id(),
            mirror: EntityStore::new(schema).with_tracer(tracer.clone()),
            subscription: Some(subscription),
            synced: false,
            source,
            tracer,
        }
    }

    /// Current subscriber id.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber
    }

    /// Returns true while a stream is open.
    pub fn is_connected(&self) -> bool {
        self.subscription.is_some()
    }

    /// Returns true once an initial state has been applied.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of mirrored entities.
    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    /// Returns true if the mirror is empty.
    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    /// Reads one mirrored entity.
    pub fn get(&self, key: &Key) -> Option<&MetaEntity> {
        self.mirror.get(key)
    }

    /// Lists mirrored entities of one kind.
    pub fn list(
        &self,
        kind: &str,
        start: &Cursor,
        limit: usize,
    ) -> CodecResult<MetaListEntitiesResponse> {
        self.mirror.list(kind, start, limit)
    }

    /// Looks mirrored entities up through an index.
    pub fn lookup(
        &self,
        kind: &str,
        index_name: &str,
        probe: &IndexProbe,
    ) -> CoreResult<Vec<&MetaEntity>> {
        self.mirror.lookup(kind, index_name, probe)
    }

    /// Drops the stream, as a lost connection would.
    pub fn disconnect(&mut self) {
        self.subscription = None;
    }

    /// Applies every queued message without waiting.
    ///
    /// If the stream has ended, reconnects once and keeps draining.
    /// Returns the number of messages applied.
    pub fn poll(&mut self) -> CoreResult<usize> {
        let mut applied = 0;
        let mut reconnected = false;
        loop {
            if self.subscription.is_none() {
                if reconnected {
                    break;
                }
                self.reconnect()?;
                reconnected = true;
            }
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            match subscription.try_recv() {
                Ok(message) => {
                    self.apply(message)?;
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.stream_ended(),
            }
        }
        Ok(applied)
    }

    /// Waits for the next message and applies it, reconnecting as needed.
    pub async fn next(&mut self) -> CoreResult<()> {
        loop {
            if self.subscription.is_none() {
                self.reconnect()?;
            }
            let Some(subscription) = self.subscription.as_mut() else {
                continue;
            };
            match subscription.recv().await {
                Some(message) => return self.apply(message),
                None => self.stream_ended(),
            }
        }
    }

    fn stream_ended(&mut self) {
        debug!(subscriber = %self.subscriber, "watch stream ended");
        self.tracer.record(
            self.tracer
                .event(TraceKind::ClientGotEofAttemptingReconnecting)
                .subscriber(self.subscriber.as_u64()),
        );
        self.subscription = None;
    }

    /// Resumes the stream, or starts over if the cursor has expired.
    pub fn reconnect(&mut self) -> CoreResult<()> {
        self.subscription = None;
        let t = &self.tracer;
        t.record(
            t.event(TraceKind::ClientCurrentlyDisconnectedAttemptingReconnect)
                .subscriber(self.subscriber.as_u64()),
        );
        match self.source.resume_watch(self.subscriber) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
            }
            Err(err @ (CoreError::CursorExpired { .. } | CoreError::SubscriberNotFound { .. })) => {
                warn!(subscriber = %self.subscriber, error = %err, "cannot resume, resubscribing");
                t.record(
                    t.event(TraceKind::ClientFailedReconnect)
                        .subscriber(self.subscriber.as_u64())
                        .error(&err),
                );
                let subscription = self.source.watch();
                self.subscriber = subscription.id();
                self.synced = false;
                self.subscription = Some(subscription);
            }
            Err(err) => {
                t.record(
                    t.event(TraceKind::ClientFailedReconnect)
                        .subscriber(self.subscriber.as_u64())
                        .error(&err),
                );
                return Err(err);
            }
        }
        self.tracer.record(
            self.tracer
                .event(TraceKind::ClientConnectionReestablished)
                .subscriber(self.subscriber.as_u64()),
        );
        Ok(())
    }

    fn apply(&mut self, message: WatchTransactionsResponse) -> CoreResult<()> {
        match message {
            WatchTransactionsResponse::InitialState(initial) => {
                self.mirror.clear();
                for entity in initial.entities {
                    self.mirror.put(entity);
                }
                self.synced = true;
            }
            WatchTransactionsResponse::Batch(batch) => {
                self.mirror.apply(&StoreDiff {
                    mutated: batch.mutated_entities,
                    deleted: batch.deleted_keys,
                })?;
            }
        }
        Ok(())
    }
}

impl<S: WatchSource> std::fmt::Debug for Replica<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("subscriber", &self.subscriber)
            .field("entities", &self.mirror.len())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
