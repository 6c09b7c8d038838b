//! Opaque pagination cursors.
//!
//! A cursor names the last key a page returned. Its bytes are
//! `version ‖ encode_key(key) ‖ crc32(be)`; the checksum makes a damaged
//! cursor fail to decode instead of silently resuming somewhere else.

use crate::error::{CodecError, CodecResult};
use crate::key::Key;
use crate::ordered::{decode_key, encode_key};
use serde::{Deserialize, Serialize};

const CURSOR_VERSION: u8 = 0x01;
const CRC_LEN: usize = 4;

/// Opaque position in a key-ordered listing.
///
/// The empty cursor means "from the beginning".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    /// The start-of-listing cursor.
    pub const fn start() -> Self {
        Self(Vec::new())
    }

    /// Wraps bytes received from a client without validating them.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Builds the cursor positioned after `key`.
    pub fn after(key: &Key) -> CodecResult<Self> {
        let encoded = encode_key(key)?;
        let mut bytes = Vec::with_capacity(1 + encoded.len() + CRC_LEN);
        bytes.push(CURSOR_VERSION);
        bytes.extend_from_slice(&encoded);
        let crc = compute_crc32(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        Ok(Self(bytes))
    }

    /// Returns true for the start-of-listing cursor.
    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw cursor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the cursor, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decodes the key this cursor was built from.
    ///
    /// Returns `Ok(None)` for the start cursor.
    ///
    /// # Errors
    ///
    /// Any corruption is reported as [`CodecError::MalformedCursor`].
    pub fn decode(&self) -> CodecResult<Option<Key>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        if self.0.len() < 1 + CRC_LEN {
            return Err(CodecError::malformed_cursor("cursor too short"));
        }
        if self.0[0] != CURSOR_VERSION {
            return Err(CodecError::malformed_cursor(format!(
                "unsupported cursor version {}",
                self.0[0]
            )));
        }
        let (body, crc_bytes) = self.0.split_at(self.0.len() - CRC_LEN);
        let mut expected = [0u8; CRC_LEN];
        expected.copy_from_slice(crc_bytes);
        let expected = u32::from_be_bytes(expected);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CodecError::malformed_cursor(format!(
                "checksum mismatch: expected {expected:08x}, got {actual:08x}"
            )));
        }
        decode_key(&body[1..])
            .map(Some)
            .map_err(|e| CodecError::malformed_cursor(e.to_string()))
    }
}

/// Computes CRC32 (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{PartitionId, PathElement};

    fn sample_key() -> Key {
        Key::top_level(PartitionId::new("default"), PathElement::with_name("User", "alice"))
            .child(PathElement::with_id("Token", 42))
    }

    #[test]
    fn start_cursor_decodes_to_none() {
        assert!(Cursor::start().is_start());
        assert_eq!(Cursor::start().decode().unwrap(), None);
    }

    #[test]
    fn cursor_roundtrip() {
        let key = sample_key();
        let cursor = Cursor::after(&key).unwrap();
        assert_eq!(cursor.decode().unwrap(), Some(key));
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let cursor = Cursor::after(&sample_key()).unwrap();
        let bytes = cursor.into_bytes();
        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[i] ^= 1 << bit;
                let err = Cursor::from_bytes(corrupted).decode().unwrap_err();
                assert!(matches!(err, CodecError::MalformedCursor { .. }));
            }
        }
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = Cursor::after(&sample_key()).unwrap().into_bytes();
        for len in 1..bytes.len() {
            let err = Cursor::from_bytes(bytes[..len].to_vec()).decode().unwrap_err();
            assert!(matches!(err, CodecError::MalformedCursor { .. }));
        }
    }

    #[test]
    fn garbage_is_malformed() {
        let err = Cursor::from_bytes(b"not a cursor".to_vec()).decode().unwrap_err();
        assert!(matches!(err, CodecError::MalformedCursor { .. }));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
