//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A cursor could not be decoded back into a key.
    #[error("malformed cursor: {message}")]
    MalformedCursor {
        /// What was wrong with the cursor bytes.
        message: String,
    },

    /// A wire value's populated payload does not match its declared type.
    #[error("value {id} declared as {declared} but carries {actual}")]
    ValueTypeMismatch {
        /// Field id of the offending value.
        id: u32,
        /// Declared type name.
        declared: String,
        /// Description of the payload actually present.
        actual: String,
    },

    /// Key is structurally invalid for the requested operation.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Failed to encode a wire message.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a wire message.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create a malformed cursor error.
    pub fn malformed_cursor(message: impl Into<String>) -> Self {
        Self::MalformedCursor {
            message: message.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
