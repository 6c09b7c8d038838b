//! Watch streams.
//!
//! A subscriber first receives the full store as an initial state, then one
//! batch per committed transaction, in commit order. Each subscriber owns a
//! bounded queue; the committer only ever does a non-blocking send, and a
//! subscriber whose queue is full is disconnected and must start over.
//!
//! Subscriber lifecycle:
//!
//! ```text
//! AwaitingInitialState -> Streaming -> Disconnected -> (reconnect) Streaming
//!                                   \-> Closed
//! ```

mod broadcaster;
mod subscription;

pub use broadcaster::WatchBroadcaster;
pub use subscription::Subscription;
pub use tokio::sync::mpsc::error::TryRecvError;

use crate::messages::{MetaTransactionBatch, MetaTransactionInitialState};
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a subscriber is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriberState {
    /// Registered; the initial state has not been received yet.
    AwaitingInitialState,
    /// Receiving batches.
    Streaming,
    /// Stream dropped; the cursor is kept for a reconnect.
    Disconnected,
    /// Unsubscribed or shut down.
    Closed,
}

impl SubscriberState {
    /// Returns true while the subscriber holds an open stream.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SubscriberState::AwaitingInitialState | SubscriberState::Streaming
        )
    }
}

/// What travels through a subscriber queue.
#[derive(Debug)]
pub(crate) enum Delivery {
    InitialState(MetaTransactionInitialState),
    Batch(SequenceNumber, Arc<MetaTransactionBatch>),
}
