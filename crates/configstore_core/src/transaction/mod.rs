//! Atomic multi-operation transactions.
//!
//! A transaction is an ordered list of list/get/create/update/delete
//! operations. It either commits every write or none:
//! - **Atomicity**: writes are staged in a [`PendingTransaction`] and applied
//!   as one diff
//! - **Ordering**: later operations see the effects of earlier ones
//! - **Isolation**: other readers only ever see committed state

mod engine;
mod pending;

pub use engine::TransactionEngine;
pub use pending::{PendingTransaction, PendingWrite};
