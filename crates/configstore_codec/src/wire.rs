//! CBOR framing for RPC messages.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a message to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_wire<T: Serialize>(message: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(message, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Deserializes a message from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for malformed frames, including
/// values whose payload does not match their declared type.
pub fn from_wire<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
