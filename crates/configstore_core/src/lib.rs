//! # Configstore Core
//!
//! Schema-typed, key-addressed entity store with atomic transactions and
//! replayable watch streams.
//!
//! This crate provides:
//! - Schema registry and field validators
//! - In-memory entity store with kind-scoped listing and secondary indexes
//! - Transaction engine applying ordered operation lists all-or-nothing
//! - Bounded transaction log
//! - Watch broadcaster with per-subscriber queues and cursor-based resume
//! - Client-side [`Replica`] that mirrors a watched store
//! - Structured trace events through an injected [`TraceSink`]
//!
//! # Consistency
//!
//! One transaction commits at a time. A commit applies its diff, appends to
//! the log and queues its batch for every watcher under a single write lock,
//! so a watcher's initial state plus its batches always reproduce the store
//! exactly, in commit order.
//!
//! ```rust,ignore
//! use configstore_core::{Config, Configstore, Schema};
//!
//! let store = Configstore::open(Schema::load("schema.json")?, Config::default())?;
//! let mut watch = store.watch();
//! while let Some(message) = watch.recv().await {
//!     println!("{message:?}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod configstore;
mod entity;
mod error;
mod log;
mod messages;
mod replica;
pub mod schema;
mod store;
mod trace;
mod transaction;
mod types;
pub mod watch;

pub use config::Config;
pub use configstore::Configstore;
pub use entity::MetaEntity;
pub use error::{CoreError, CoreResult, ErrorCode, OperationError, SchemaViolation};
pub use log::{LogEntry, TransactionLog};
pub use messages::{
    MetaCreateEntityRequest, MetaCreateEntityResponse, MetaDeleteEntityRequest,
    MetaDeleteEntityResponse, MetaGetEntityRequest, MetaGetEntityResponse,
    MetaListEntitiesRequest, MetaListEntitiesResponse, MetaOperation, MetaOperationResult,
    MetaOperationResultError, MetaTransaction, MetaTransactionBatch, MetaTransactionInitialState,
    MetaTransactionRecord, MetaTransactionResult, MetaUpdateEntityRequest,
    MetaUpdateEntityResponse, WatchTransactionsResponse,
};
pub use replica::{Replica, WatchSource};
pub use schema::{Schema, SchemaRegistry};
pub use store::{EntityStore, IndexProbe, IndexTerm, KindIndex, StoreDiff};
pub use trace::{MemoryTraceSink, TraceEvent, TraceKind, TraceSink, Tracer, TracingSink};
pub use transaction::{PendingTransaction, PendingWrite, TransactionEngine};
pub use types::{SequenceNumber, SubscriberId};
pub use watch::{SubscriberState, Subscription, WatchBroadcaster};

pub use configstore_codec::{
    Cursor, Key, PartitionId, PathElement, PathId, Timestamp, Value, ValueData, ValueType,
};
