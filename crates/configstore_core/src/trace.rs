//! Structured trace events.
//!
//! Every state transition the store, the broadcaster and watch clients go
//! through is reported as a [`TraceEvent`] to an injected [`TraceSink`].
//! [`TracingSink`] forwards events to `tracing`; [`MemoryTraceSink`] records
//! them for inspection.

use crate::entity::MetaEntity;
use configstore_codec::Key;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum TraceKind {
    InitialStateSendBegin,
    InitialStateSendEntity,
    InitialStateSendEnd,
    InitialStateReceiveBegin,
    InitialStateReceiveEntity,
    InitialStateReceiveEnd,
    TransactionBatchSendBegin,
    TransactionBatchSendMutatedEntity,
    TransactionBatchSendDeletedEntityKey,
    TransactionBatchSendEnd,
    TransactionBatchReceiveBegin,
    TransactionBatchReceiveMutatedEntity,
    TransactionBatchReceiveDeletedEntityKey,
    TransactionBatchReceiveEnd,
    InMemoryStoreEntity,
    InMemoryDeleteEntity,
    TransactionArrived,
    TransactionFinishedProcessing,
    TransactionStalled,
    ConfigstoreConsistent,
    TransactionMutatedEntityKey,
    TransactionDeletedEntityKey,
    TransactionReconstructAppendMutatedEntity,
    ClientCurrentlyDisconnectedAttemptingReconnect,
    ClientGotEofAttemptingReconnecting,
    ClientFailedReconnect,
    ClientConnectionReestablished,
    ServerStartupGrpcPort,
    ServerStartupHttpPort,
    ServerGracefulShutdown,
}

impl TraceKind {
    /// Stable numeric code of the event kind.
    pub const fn code(self) -> u32 {
        match self {
            TraceKind::InitialStateSendBegin => 0,
            TraceKind::InitialStateSendEntity => 1,
            TraceKind::InitialStateSendEnd => 2,
            TraceKind::InitialStateReceiveBegin => 3,
            TraceKind::InitialStateReceiveEntity => 4,
            TraceKind::InitialStateReceiveEnd => 5,
            TraceKind::TransactionBatchSendBegin => 6,
            TraceKind::TransactionBatchSendMutatedEntity => 7,
            TraceKind::TransactionBatchSendDeletedEntityKey => 8,
            TraceKind::TransactionBatchSendEnd => 9,
            TraceKind::TransactionBatchReceiveBegin => 10,
            TraceKind::TransactionBatchReceiveMutatedEntity => 11,
            TraceKind::TransactionBatchReceiveDeletedEntityKey => 12,
            TraceKind::TransactionBatchReceiveEnd => 13,
            TraceKind::InMemoryStoreEntity => 14,
            TraceKind::InMemoryDeleteEntity => 15,
            TraceKind::TransactionArrived => 16,
            TraceKind::TransactionFinishedProcessing => 17,
            TraceKind::TransactionStalled => 18,
            TraceKind::ConfigstoreConsistent => 19,
            TraceKind::TransactionMutatedEntityKey => 20,
            TraceKind::TransactionDeletedEntityKey => 21,
            TraceKind::TransactionReconstructAppendMutatedEntity => 22,
            TraceKind::ClientCurrentlyDisconnectedAttemptingReconnect => 23,
            TraceKind::ClientGotEofAttemptingReconnecting => 24,
            TraceKind::ClientFailedReconnect => 26,
            TraceKind::ClientConnectionReestablished => 27,
            TraceKind::ServerStartupGrpcPort => 29,
            TraceKind::ServerStartupHttpPort => 30,
            TraceKind::ServerGracefulShutdown => 31,
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One structured trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Event kind.
    pub kind: TraceKind,
    /// Service that emitted the event.
    pub operator_id: String,
    /// Transaction the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Key the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    /// Entity the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<MetaEntity>,
    /// Transactions still queued, for arrival/stall/finish events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_transaction_queue_count: Option<u32>,
    /// Subscriber the event concerns, for watch events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<u64>,
    /// Error text, for failure events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Port, for server startup events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TraceEvent {
    /// Creates an event with no attached data.
    pub fn new(kind: TraceKind, operator_id: impl Into<String>) -> Self {
        Self {
            kind,
            operator_id: operator_id.into(),
            transaction_id: None,
            key: None,
            entity: None,
            remaining_transaction_queue_count: None,
            subscriber_id: None,
            error: None,
            port: None,
        }
    }

    /// Attaches a transaction id.
    #[must_use]
    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    /// Attaches a key.
    #[must_use]
    pub fn key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    /// Attaches an entity.
    #[must_use]
    pub fn entity(mut self, entity: MetaEntity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attaches the queue count.
    #[must_use]
    pub fn queue_count(mut self, count: usize) -> Self {
        self.remaining_transaction_queue_count = Some(u32::try_from(count).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a subscriber id.
    #[must_use]
    pub fn subscriber(mut self, id: u64) -> Self {
        self.subscriber_id = Some(id);
        self
    }

    /// Attaches an error message.
    #[must_use]
    pub fn error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Attaches a port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Receiver of trace events.
pub trait TraceSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: TraceEvent);
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: TraceEvent) {
        tracing::debug!(
            target: "configstore::trace",
            kind = %event.kind,
            code = event.kind.code(),
            operator = %event.operator_id,
            transaction = event.transaction_id.as_deref().unwrap_or(""),
            key = %event.key.as_ref().map(ToString::to_string).unwrap_or_default(),
            queue = event.remaining_transaction_queue_count,
            subscriber = event.subscriber_id,
            error = event.error.as_deref().unwrap_or(""),
            port = event.port,
        );
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Returns the kinds of all recorded events, in order.
    pub fn kinds(&self) -> Vec<TraceKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// Counts events of one kind.
    pub fn count(&self, kind: TraceKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Removes all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: TraceEvent) {
        self.events.lock().push(event);
    }
}

/// A sink bound to an operator id.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
    operator_id: Arc<str>,
}

impl Tracer {
    /// Creates a tracer.
    pub fn new(sink: Arc<dyn TraceSink>, operator_id: &str) -> Self {
        Self {
            sink,
            operator_id: Arc::from(operator_id),
        }
    }

    /// Starts an event of `kind` stamped with this tracer's operator id.
    pub fn event(&self, kind: TraceKind) -> TraceEvent {
        TraceEvent::new(kind, self.operator_id.as_ref())
    }

    /// Records an event.
    pub fn record(&self, event: TraceEvent) {
        self.sink.record(event);
    }

    /// Records a bare event of `kind`.
    pub fn emit(&self, kind: TraceKind) {
        self.record(self.event(kind));
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("operator_id", &self.operator_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = Arc::new(MemoryTraceSink::new());
        let tracer = Tracer::new(sink.clone(), "test");
        tracer.emit(TraceKind::TransactionArrived);
        tracer.record(
            tracer
                .event(TraceKind::TransactionFinishedProcessing)
                .queue_count(0),
        );
        assert_eq!(
            sink.kinds(),
            vec![
                TraceKind::TransactionArrived,
                TraceKind::TransactionFinishedProcessing
            ]
        );
        assert_eq!(sink.events()[1].remaining_transaction_queue_count, Some(0));
        assert_eq!(sink.events()[0].operator_id, "test");
    }

    #[test]
    fn codes_match_wire_values() {
        assert_eq!(TraceKind::InitialStateSendBegin.code(), 0);
        assert_eq!(TraceKind::ConfigstoreConsistent.code(), 19);
        assert_eq!(TraceKind::ServerGracefulShutdown.code(), 31);
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        TracingSink.record(TraceEvent::new(TraceKind::ServerStartupGrpcPort, "x").port(13389));
    }
}
