//! In-memory entity storage.
//!
//! The [`EntityStore`] holds the last committed state. It is always accessed
//! through a single `RwLock` together with the transaction log, so that a
//! diff, its log entry and its broadcast become visible at the same instant.

mod entity_store;
mod index;

pub use entity_store::{EntityStore, StoreDiff, DEFAULT_LIST_LIMIT};
pub use index::{IndexProbe, IndexTerm, KindIndex};

pub(crate) use entity_store::page;

use crate::log::TransactionLog;

/// Committed entities plus the log that produced them.
#[derive(Debug)]
pub(crate) struct CommittedState {
    pub(crate) store: EntityStore,
    pub(crate) log: TransactionLog,
}
