//! # Configstore Codec
//!
//! Keys, typed values and their byte encodings.
//!
//! - [`Key`] / [`PathElement`]: hierarchical entity addresses with a total order
//! - [`Value`] / [`ValueData`]: typed field payloads; the wire form
//!   ([`ValueMessage`]) rejects payloads that disagree with their type
//! - [`encode_key`] / [`decode_key`]: order-preserving key bytes
//! - [`Cursor`]: opaque, checksummed pagination positions
//! - [`fnv1a_64`] / [`fnv1a_32`]: hashes used by computed indexes
//! - [`to_wire`] / [`from_wire`]: CBOR message frames
//!
//! ## Usage
//!
//! ```
//! use configstore_codec::{Cursor, Key, PartitionId, PathElement};
//!
//! let key = Key::top_level(PartitionId::new("default"), PathElement::with_name("User", "alice"));
//! let cursor = Cursor::after(&key).unwrap();
//! assert_eq!(cursor.decode().unwrap(), Some(key));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod error;
mod hash;
mod key;
mod ordered;
mod value;
mod wire;

pub use cursor::{compute_crc32, Cursor};
pub use error::{CodecError, CodecResult};
pub use hash::{fnv1a_32, fnv1a_64, index_bytes};
pub use key::{Key, PartitionId, PathElement, PathId};
pub use ordered::{
    decode_key, encode_key, encode_value_sort_key, OrderedDecoder, OrderedEncoder,
};
pub use value::{Timestamp, Value, ValueData, ValueMessage, ValueType};
pub use wire::{from_wire, to_wire};
