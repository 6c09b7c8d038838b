//! Client end of a watch stream.

use crate::messages::{MetaTransactionBatch, MetaTransactionInitialState, WatchTransactionsResponse};
use crate::trace::{TraceKind, Tracer};
use crate::types::{SequenceNumber, SubscriberId};
use crate::watch::{Delivery, SubscriberState};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Per-subscriber state shared by the broadcaster and the live stream.
#[derive(Debug)]
pub(crate) struct Status {
    pub(crate) state: SubscriberState,
    /// Bumped on every reconnect so that a stale stream cannot touch the
    /// state of its replacement.
    pub(crate) generation: u64,
    /// Sequence of the last batch the client received.
    pub(crate) cursor: SequenceNumber,
    /// Set once the initial state has been received.
    pub(crate) synced: bool,
    /// Set when the subscriber was dropped for falling behind.
    pub(crate) expired: bool,
}

pub(crate) type SharedStatus = Arc<Mutex<Status>>;

/// A live watch stream.
///
/// Dropping the subscription leaves the subscriber disconnected with its
/// cursor intact, so the stream can be resumed later.
pub struct Subscription {
    id: SubscriberId,
    generation: u64,
    receiver: mpsc::Receiver<Delivery>,
    status: SharedStatus,
    tracer: Tracer,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        generation: u64,
        receiver: mpsc::Receiver<Delivery>,
        status: SharedStatus,
        tracer: Tracer,
    ) -> Self {
        Self {
            id,
            generation,
            receiver,
            status,
            tracer,
        }
    }

    /// Subscriber id, used to resume the stream.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Sequence of the last batch received.
    pub fn cursor(&self) -> SequenceNumber {
        self.status.lock().cursor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        self.status.lock().state
    }

    /// Waits for the next message. Returns `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<WatchTransactionsResponse> {
        let delivery = self.receiver.recv().await?;
        Some(self.accept(delivery))
    }

    /// Takes the next message if one is queued.
    pub fn try_recv(&mut self) -> Result<WatchTransactionsResponse, TryRecvError> {
        let delivery = self.receiver.try_recv()?;
        Ok(self.accept(delivery))
    }

    fn accept(&self, delivery: Delivery) -> WatchTransactionsResponse {
        match delivery {
            Delivery::InitialState(initial) => {
                self.trace_initial_state(&initial);
                let mut status = self.status.lock();
                if status.generation == self.generation && status.state.is_live() {
                    status.state = SubscriberState::Streaming;
                    status.synced = true;
                }
                WatchTransactionsResponse::InitialState(initial)
            }
            Delivery::Batch(sequence, batch) => {
                self.trace_batch(&batch);
                let mut status = self.status.lock();
                if status.generation == self.generation && sequence > status.cursor {
                    status.cursor = sequence;
                }
                WatchTransactionsResponse::Batch(Arc::unwrap_or_clone(batch))
            }
        }
    }

    fn trace_initial_state(&self, initial: &MetaTransactionInitialState) {
        let id = self.id.as_u64();
        let t = &self.tracer;
        t.record(t.event(TraceKind::InitialStateReceiveBegin).subscriber(id));
        for entity in &initial.entities {
            t.record(
                t.event(TraceKind::InitialStateReceiveEntity)
                    .subscriber(id)
                    .entity(entity.clone()),
            );
        }
        t.record(t.event(TraceKind::InitialStateReceiveEnd).subscriber(id));
    }

    fn trace_batch(&self, batch: &MetaTransactionBatch) {
        let id = self.id.as_u64();
        let t = &self.tracer;
        let event = |kind| t.event(kind).subscriber(id).transaction(batch.id.as_str());
        t.record(event(TraceKind::TransactionBatchReceiveBegin));
        for entity in &batch.mutated_entities {
            t.record(event(TraceKind::TransactionBatchReceiveMutatedEntity).entity(entity.clone()));
        }
        for key in &batch.deleted_keys {
            t.record(event(TraceKind::TransactionBatchReceiveDeletedEntityKey).key(key.clone()));
        }
        t.record(event(TraceKind::TransactionBatchReceiveEnd));
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut status = self.status.lock();
        if status.generation == self.generation && status.state.is_live() {
            status.state = SubscriberState::Disconnected;
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
