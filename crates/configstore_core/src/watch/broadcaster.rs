//! Fan-out of committed batches to subscribers.

use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult};
use crate::log::TransactionLog;
use crate::messages::{MetaTransactionBatch, MetaTransactionInitialState};
use crate::trace::{TraceKind, Tracer};
use crate::types::{SequenceNumber, SubscriberId};
use crate::watch::subscription::{SharedStatus, Status};
use crate::watch::{Delivery, SubscriberState, Subscription};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Reaped subscribers remembered so that a late resume reports an expired
/// cursor rather than an unknown id.
const EXPIRED_MEMORY: usize = 1024;

struct Slot {
    status: SharedStatus,
    sender: Option<mpsc::Sender<Delivery>>,
}

/// Registry of watch subscribers.
///
/// [`subscribe`](Self::subscribe) and [`reconnect`](Self::reconnect) must be
/// called while the caller holds the store read lock, and
/// [`publish`](Self::publish) while it holds the write lock, so that no batch
/// can fall between a snapshot and the first streamed batch.
pub struct WatchBroadcaster {
    slots: Mutex<HashMap<SubscriberId, Slot>>,
    expired: Mutex<VecDeque<(SubscriberId, SequenceNumber)>>,
    next_id: AtomicU64,
    capacity: usize,
    tracer: Tracer,
}

impl WatchBroadcaster {
    /// Creates a broadcaster whose subscribers queue up to `capacity` batches.
    pub fn new(capacity: usize, tracer: Tracer) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            expired: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            tracer,
        }
    }

    /// Registers a subscriber that starts from `entities` at log position `head`.
    pub fn subscribe(&self, entities: Vec<MetaEntity>, head: SequenceNumber) -> Subscription {
        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity + 1);
        let count = entities.len();

        let t = &self.tracer;
        t.record(t.event(TraceKind::InitialStateSendBegin).subscriber(id.as_u64()));
        for entity in &entities {
            t.record(
                t.event(TraceKind::InitialStateSendEntity)
                    .subscriber(id.as_u64())
                    .entity(entity.clone()),
            );
        }
        let queued =
            sender.try_send(Delivery::InitialState(MetaTransactionInitialState { entities }));
        debug_assert!(queued.is_ok());
        t.record(t.event(TraceKind::InitialStateSendEnd).subscriber(id.as_u64()));

        let status = Arc::new(Mutex::new(Status {
            state: SubscriberState::AwaitingInitialState,
            generation: 0,
            cursor: head,
            synced: false,
            expired: false,
        }));
        self.slots.lock().insert(
            id,
            Slot {
                status: Arc::clone(&status),
                sender: Some(sender),
            },
        );
        debug!(subscriber = %id, entities = count, cursor = %head, "subscriber registered");
        Subscription::new(id, 0, receiver, status, self.tracer.clone())
    }

    /// Queues a committed batch for every connected subscriber.
    ///
    /// Never blocks: a subscriber whose queue is full is disconnected and
    /// its cursor expired.
    pub fn publish(&self, sequence: SequenceNumber, batch: &Arc<MetaTransactionBatch>) {
        let mut slots = self.slots.lock();
        for (id, slot) in slots.iter_mut() {
            let outcome = match &slot.sender {
                Some(sender) => sender.try_send(Delivery::Batch(sequence, Arc::clone(batch))),
                None => continue,
            };
            match outcome {
                Ok(()) => self.trace_send(*id, batch),
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, %sequence, "subscriber queue full, disconnecting");
                    let mut status = slot.status.lock();
                    status.state = SubscriberState::Disconnected;
                    status.expired = true;
                    slot.sender = None;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "subscriber stream closed");
                    let mut status = slot.status.lock();
                    if status.state.is_live() {
                        status.state = SubscriberState::Disconnected;
                    }
                    slot.sender = None;
                }
            }
        }
    }

    fn trace_send(&self, id: SubscriberId, batch: &MetaTransactionBatch) {
        let t = &self.tracer;
        let event = |kind| {
            t.event(kind)
                .subscriber(id.as_u64())
                .transaction(batch.id.as_str())
        };
        t.record(event(TraceKind::TransactionBatchSendBegin));
        for entity in &batch.mutated_entities {
            t.record(event(TraceKind::TransactionBatchSendMutatedEntity).entity(entity.clone()));
        }
        for key in &batch.deleted_keys {
            t.record(event(TraceKind::TransactionBatchSendDeletedEntityKey).key(key.clone()));
        }
        t.record(event(TraceKind::TransactionBatchSendEnd));
    }

    /// Resumes a disconnected subscriber from its cursor.
    ///
    /// Every batch after the cursor is replayed from `log` before live
    /// batches; the initial state is not sent again.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SubscriberNotFound`] if the id is unknown or closed
    /// - [`CoreError::CursorExpired`] if the subscriber fell behind, never
    ///   received its initial state, or the log no longer holds the batches
    ///   it needs; the subscriber is dropped. Recently reaped ids fail the
    ///   same way.
    pub fn reconnect(&self, id: SubscriberId, log: &TransactionLog) -> CoreResult<Subscription> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&id) else {
            return Err(match self.forget_expired(id) {
                Some(cursor) => CoreError::CursorExpired {
                    cursor: cursor.as_u64(),
                },
                None => CoreError::SubscriberNotFound { id: id.as_u64() },
            });
        };

        let (cursor, resumable) = {
            let status = slot.status.lock();
            (status.cursor, status.synced && !status.expired)
        };
        let replay = if resumable {
            log.batches_since(cursor)
        } else {
            Err(CoreError::CursorExpired {
                cursor: cursor.as_u64(),
            })
        };
        let replay = match replay {
            Ok(replay) => replay,
            Err(err) => {
                info!(subscriber = %id, %cursor, "cursor expired, dropping subscriber");
                if let Some(slot) = slots.remove(&id) {
                    slot.status.lock().state = SubscriberState::Closed;
                }
                return Err(err);
            }
        };

        let (sender, receiver) = mpsc::channel(self.capacity + replay.len());
        let replayed = replay.len();
        for (sequence, batch) in replay {
            for entity in &batch.mutated_entities {
                self.tracer.record(
                    self.tracer
                        .event(TraceKind::TransactionReconstructAppendMutatedEntity)
                        .subscriber(id.as_u64())
                        .transaction(batch.id.as_str())
                        .entity(entity.clone()),
                );
            }
            self.trace_send(id, &batch);
            let queued = sender.try_send(Delivery::Batch(sequence, batch));
            debug_assert!(queued.is_ok());
        }

        let generation = {
            let mut status = slot.status.lock();
            status.generation += 1;
            status.state = SubscriberState::Streaming;
            status.generation
        };
        slot.sender = Some(sender);
        info!(subscriber = %id, %cursor, replayed, "subscriber reconnected");
        Ok(Subscription::new(
            id,
            generation,
            receiver,
            Arc::clone(&slot.status),
            self.tracer.clone(),
        ))
    }

    /// Drops disconnected subscribers that can no longer be resumed.
    ///
    /// That is every disconnected subscriber that was expired, never
    /// received its initial state, or whose next batch `log` no longer
    /// holds. Called by the committer after [`publish`](Self::publish).
    /// Returns how many subscribers were dropped.
    pub fn reap(&self, log: &TransactionLog) -> usize {
        let mut reaped = Vec::new();
        self.slots.lock().retain(|id, slot| {
            let mut status = slot.status.lock();
            let stale = status.state == SubscriberState::Disconnected
                && (status.expired || !status.synced || !log.can_replay_from(status.cursor));
            if stale {
                status.state = SubscriberState::Closed;
                reaped.push((*id, status.cursor));
            }
            !stale
        });
        if reaped.is_empty() {
            return 0;
        }

        let count = reaped.len();
        let mut expired = self.expired.lock();
        for entry in reaped {
            if expired.len() == EXPIRED_MEMORY {
                expired.pop_front();
            }
            expired.push_back(entry);
        }
        debug!(count, "dropped subscribers past the replay window");
        count
    }

    fn forget_expired(&self, id: SubscriberId) -> Option<SequenceNumber> {
        let mut expired = self.expired.lock();
        let position = expired.iter().position(|(reaped, _)| *reaped == id)?;
        expired.remove(position).map(|(_, cursor)| cursor)
    }

    /// Closes a subscriber and releases its queue.
    pub fn unsubscribe(&self, id: SubscriberId) -> CoreResult<()> {
        let slot = self
            .slots
            .lock()
            .remove(&id)
            .ok_or(CoreError::SubscriberNotFound { id: id.as_u64() })?;
        slot.status.lock().state = SubscriberState::Closed;
        debug!(subscriber = %id, "subscriber closed");
        Ok(())
    }

    /// Closes every subscriber. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        self.expired.lock().clear();
        for (_, slot) in &drained {
            slot.status.lock().state = SubscriberState::Closed;
        }
        drained.len()
    }

    /// State of a registered subscriber; `None` once it is closed or unknown.
    pub fn subscriber_state(&self, id: SubscriberId) -> Option<SubscriberState> {
        self.slots.lock().get(&id).map(|slot| slot.status.lock().state)
    }

    /// Number of registered subscribers, connected or not.
    pub fn subscriber_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl std::fmt::Debug for WatchBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MetaTransactionRecord, WatchTransactionsResponse};
    use crate::trace::MemoryTraceSink;
    use crate::watch::TryRecvError;
    use configstore_codec::{Key, PartitionId, PathElement, Timestamp};

    fn tracer() -> (Arc<MemoryTraceSink>, Tracer) {
        let sink = Arc::new(MemoryTraceSink::new());
        let tracer = Tracer::new(sink.clone(), "test");
        (sink, tracer)
    }

    fn key(id: i64) -> Key {
        Key::top_level(PartitionId::new("default"), PathElement::with_id("User", id))
    }

    fn commit(log: &mut TransactionLog, id: &str) -> (SequenceNumber, Arc<MetaTransactionBatch>) {
        let batch = Arc::new(MetaTransactionBatch {
            id: id.to_string(),
            description: String::new(),
            mutated_entities: vec![MetaEntity::empty(key(1))],
            deleted_keys: vec![],
        });
        let record = MetaTransactionRecord {
            id: id.to_string(),
            date_submitted: Timestamp::default(),
            date_created: Timestamp::default(),
            description: String::new(),
            mutated_keys: vec![key(1)],
            deleted_keys: vec![],
        };
        (log.append(record, Arc::clone(&batch)), batch)
    }

    #[test]
    fn initial_state_then_batches() {
        let (sink, tracer) = tracer();
        let bus = WatchBroadcaster::new(4, tracer);
        let mut log = TransactionLog::new(10, 10);
        let mut sub = bus.subscribe(vec![MetaEntity::empty(key(9))], log.head());
        assert_eq!(sub.state(), SubscriberState::AwaitingInitialState);

        let (seq, batch) = commit(&mut log, "t1");
        bus.publish(seq, &batch);

        match sub.try_recv().unwrap() {
            WatchTransactionsResponse::InitialState(s) => assert_eq!(s.entities.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sub.state(), SubscriberState::Streaming);
        assert!(matches!(
            sub.try_recv().unwrap(),
            WatchTransactionsResponse::Batch(b) if b.id == "t1"
        ));
        assert_eq!(sub.cursor(), seq);
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(sink.count(TraceKind::TransactionBatchSendBegin), 1);
        assert_eq!(sink.count(TraceKind::TransactionBatchReceiveEnd), 1);
    }

    #[test]
    fn full_queue_expires_subscriber() {
        let (_, tracer) = tracer();
        let bus = WatchBroadcaster::new(1, tracer);
        let mut log = TransactionLog::new(10, 10);
        let mut sub = bus.subscribe(vec![], log.head());
        sub.try_recv().unwrap();
        let id = sub.id();

        // One slot beyond the capacity is reserved for the initial state.
        for name in ["a", "b", "c"] {
            let (seq, batch) = commit(&mut log, name);
            bus.publish(seq, &batch);
        }
        assert_eq!(bus.subscriber_state(id), Some(SubscriberState::Disconnected));
        drop(sub);
        assert!(matches!(
            bus.reconnect(id, &log),
            Err(CoreError::CursorExpired { .. })
        ));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn reconnect_replays_missed_batches_only() {
        let (sink, tracer) = tracer();
        let bus = WatchBroadcaster::new(8, tracer);
        let mut log = TransactionLog::new(10, 10);
        let mut sub = bus.subscribe(vec![], log.head());
        sub.try_recv().unwrap();
        let (seq, batch) = commit(&mut log, "seen");
        bus.publish(seq, &batch);
        sub.try_recv().unwrap();
        let id = sub.id();
        drop(sub);
        assert_eq!(bus.subscriber_state(id), Some(SubscriberState::Disconnected));

        let (seq, batch) = commit(&mut log, "missed");
        bus.publish(seq, &batch);

        let mut resumed = bus.reconnect(id, &log).unwrap();
        assert!(matches!(
            resumed.try_recv().unwrap(),
            WatchTransactionsResponse::Batch(b) if b.id == "missed"
        ));
        assert!(resumed.try_recv().is_err());
        assert_eq!(resumed.state(), SubscriberState::Streaming);
        assert_eq!(
            sink.count(TraceKind::TransactionReconstructAppendMutatedEntity),
            1
        );
    }

    #[test]
    fn disconnect_before_initial_state_cannot_resume() {
        let (_, tracer) = tracer();
        let bus = WatchBroadcaster::new(4, tracer);
        let log = TransactionLog::new(10, 10);
        let sub = bus.subscribe(vec![], log.head());
        let id = sub.id();
        drop(sub);
        assert!(matches!(
            bus.reconnect(id, &log),
            Err(CoreError::CursorExpired { .. })
        ));
    }

    #[test]
    fn unsubscribe_and_unknown_ids() {
        let (_, tracer) = tracer();
        let bus = WatchBroadcaster::new(4, tracer);
        let log = TransactionLog::new(10, 10);
        let sub = bus.subscribe(vec![], log.head());
        let id = sub.id();
        bus.unsubscribe(id).unwrap();
        assert_eq!(sub.state(), SubscriberState::Closed);
        assert!(matches!(
            bus.unsubscribe(id),
            Err(CoreError::SubscriberNotFound { .. })
        ));
        assert!(matches!(
            bus.reconnect(id, &log),
            Err(CoreError::SubscriberNotFound { .. })
        ));
    }

    #[test]
    fn reap_drops_subscribers_past_the_replay_window() {
        let (_, tracer) = tracer();
        let bus = WatchBroadcaster::new(4, tracer);
        let mut log = TransactionLog::new(2, 2);
        let mut live = bus.subscribe(vec![], log.head());
        live.try_recv().unwrap();

        let mut dropped = Vec::new();
        for _ in 0..50 {
            let mut sub = bus.subscribe(vec![], log.head());
            sub.try_recv().unwrap();
            dropped.push(sub.id());
        }

        let (seq, batch) = commit(&mut log, "a");
        bus.publish(seq, &batch);
        assert_eq!(bus.reap(&log), 0);
        assert_eq!(bus.subscriber_count(), 51);

        for name in ["b", "c"] {
            let (seq, batch) = commit(&mut log, name);
            bus.publish(seq, &batch);
        }
        assert_eq!(bus.reap(&log), 50);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(live.state(), SubscriberState::Streaming);

        assert!(matches!(
            bus.reconnect(dropped[0], &log),
            Err(CoreError::CursorExpired { cursor: 0 })
        ));
        assert!(matches!(
            bus.reconnect(dropped[0], &log),
            Err(CoreError::SubscriberNotFound { .. })
        ));
    }

    #[test]
    fn reap_keeps_resumable_subscribers() {
        let (_, tracer) = tracer();
        let bus = WatchBroadcaster::new(4, tracer);
        let mut log = TransactionLog::new(2, 2);
        let mut sub = bus.subscribe(vec![], log.head());
        sub.try_recv().unwrap();
        let id = sub.id();
        drop(sub);

        let (seq, batch) = commit(&mut log, "a");
        bus.publish(seq, &batch);
        assert_eq!(bus.reap(&log), 0);
        assert_eq!(bus.subscriber_state(id), Some(SubscriberState::Disconnected));
        assert!(bus.reconnect(id, &log).is_ok());
    }

    #[tokio::test]
    async fn close_all_ends_streams() {
        let (_, tracer) = tracer();
        let bus = WatchBroadcaster::new(4, tracer);
        let mut sub = bus.subscribe(vec![], SequenceNumber::ZERO);
        assert_eq!(bus.close_all(), 1);
        assert!(matches!(
            sub.recv().await,
            Some(WatchTransactionsResponse::InitialState(_))
        ));
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.state(), SubscriberState::Closed);
    }
}
