//! # Configstore Testkit
//!
//! Test utilities for Configstore.
//!
//! This crate provides:
//! - A sample schema and entity builders
//! - Store helpers with an in-memory trace sink
//! - Schema and transaction files in temporary directories
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use configstore_testkit::prelude::*;
//!
//! #[test]
//! fn creates_a_user() {
//!     let store = TestStore::new();
//!     let result = store.apply_transaction(transaction(vec![create_op(user("alice"))])).unwrap();
//!     assert!(result.committed);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
