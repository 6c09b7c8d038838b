//! Error types for Configstore core.

use configstore_codec::{CodecError, Key, ValueType};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Configstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key, value or cursor codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// JSON (schema or transaction file) error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The schema definition is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Kind is not declared in the schema.
    #[error("unknown kind: {name}")]
    UnknownKind {
        /// Kind name.
        name: String,
    },

    /// Index is not declared on the kind.
    #[error("unknown index {index} on kind {kind}")]
    UnknownIndex {
        /// Kind name.
        kind: String,
        /// Index name.
        index: String,
    },

    /// The transaction log no longer retains the batches needed to resume.
    #[error("cursor expired: batches after {cursor} are no longer retained")]
    CursorExpired {
        /// Sequence the caller tried to resume from.
        cursor: u64,
    },

    /// No live subscriber with this id.
    #[error("subscriber not found: {id}")]
    SubscriberNotFound {
        /// Raw subscriber id.
        id: u64,
    },

    /// A diff violated store invariants; nothing was applied.
    #[error("store corruption: {message}")]
    StoreCorruption {
        /// Description of the violated invariant.
        message: String,
    },

    /// The store faulted earlier and refuses further commits.
    #[error("store is faulted and no longer accepts transactions")]
    StoreFaulted,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an unknown kind error.
    pub fn unknown_kind(name: impl Into<String>) -> Self {
        Self::UnknownKind { name: name.into() }
    }

    /// Creates a store corruption error.
    pub fn store_corruption(message: impl Into<String>) -> Self {
        Self::StoreCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Why an entity does not conform to its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    /// Kind is not declared.
    #[error("unknown kind {kind}")]
    UnknownKind {
        /// Kind name.
        kind: String,
    },

    /// Key addresses a different kind than the operation targets.
    #[error("key addresses kind {actual}, expected {expected}")]
    KindMismatch {
        /// Kind the operation targets.
        expected: String,
        /// Kind of the key's last element.
        actual: String,
    },

    /// Key has an incomplete element where a complete key is required.
    #[error("key {key} is incomplete")]
    IncompleteKey {
        /// The key, rendered.
        key: String,
    },

    /// Ancestor path is not permitted by the kind's declared ancestors.
    #[error("kind {kind} cannot be nested under {path}")]
    AncestorViolation {
        /// Kind name.
        kind: String,
        /// Ancestor kinds found in the key, joined by `/`.
        path: String,
    },

    /// Value id does not name a field of the kind.
    #[error("kind {kind} has no field with id {field_id}")]
    UnknownField {
        /// Kind name.
        kind: String,
        /// Offending value id.
        field_id: u32,
    },

    /// The same field id appears twice.
    #[error("field {field} given more than once")]
    DuplicateField {
        /// Field name.
        field: String,
    },

    /// Value type differs from the declared field type.
    #[error("field {field} expects {expected}, got {actual}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared type.
        expected: ValueType,
        /// Supplied type.
        actual: ValueType,
    },

    /// A required field is absent or empty.
    #[error("field {field} is required")]
    MissingRequiredField {
        /// Field name.
        field: String,
    },

    /// Fixed-length constraint not met.
    #[error("field {field} must be exactly {expected} long, got {actual}")]
    FixedLength {
        /// Field name.
        field: String,
        /// Required length.
        expected: u64,
        /// Supplied length.
        actual: u64,
    },

    /// Value is not in the format the field requires.
    #[error("field {field} must be {format}")]
    InvalidFormat {
        /// Field name.
        field: String,
        /// Human-readable format name.
        format: &'static str,
    },

    /// Key reference points at a kind the field does not allow.
    #[error("field {field} cannot reference kind {kind}")]
    DisallowedKeyKind {
        /// Field name.
        field: String,
        /// Referenced kind.
        kind: String,
    },

    /// Update tried to change a read-only field.
    #[error("field {field} is read-only")]
    ReadOnlyField {
        /// Field name.
        field: String,
    },
}

/// Why a single operation inside a transaction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Entity does not conform to the schema.
    #[error("schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),

    /// Create targeted an existing key.
    #[error("entity already exists: {key}")]
    AlreadyExists {
        /// Rendered key.
        key: String,
    },

    /// Get or Update targeted a missing key.
    #[error("entity not found: {key}")]
    NotFound {
        /// Rendered key.
        key: String,
    },

    /// List cursor could not be decoded.
    #[error("malformed cursor: {message}")]
    MalformedCursor {
        /// Decoder message.
        message: String,
    },

    /// The store could not carry out the operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl OperationError {
    /// Creates a not-found error for `key`.
    pub fn not_found(key: &Key) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    /// Creates an already-exists error for `key`.
    pub fn already_exists(key: &Key) -> Self {
        Self::AlreadyExists {
            key: key.to_string(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            OperationError::SchemaViolation(_) => ErrorCode::SchemaViolation,
            OperationError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            OperationError::NotFound { .. } => ErrorCode::NotFound,
            OperationError::MalformedCursor { .. } => ErrorCode::MalformedCursor,
            OperationError::Internal { .. } => ErrorCode::Internal,
        }
    }
}

impl From<CodecError> for OperationError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::MalformedCursor { message } => Self::MalformedCursor { message },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Error category reported in a [`MetaOperationResultError`](crate::MetaOperationResultError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Entity does not conform to the schema.
    SchemaViolation,
    /// Key already exists.
    AlreadyExists,
    /// Key does not exist.
    NotFound,
    /// Cursor could not be decoded.
    MalformedCursor,
    /// Store-side failure.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_codec::{PartitionId, PathElement};

    #[test]
    fn operation_error_codes() {
        let key = Key::top_level(PartitionId::default(), PathElement::with_id("User", 1));
        assert_eq!(OperationError::not_found(&key).code(), ErrorCode::NotFound);
        assert_eq!(
            OperationError::already_exists(&key).code(),
            ErrorCode::AlreadyExists
        );
        let violation = SchemaViolation::UnknownKind {
            kind: "Nope".into(),
        };
        assert_eq!(
            OperationError::from(violation).code(),
            ErrorCode::SchemaViolation
        );
    }

    #[test]
    fn cursor_errors_map_to_malformed_cursor() {
        let err = OperationError::from(CodecError::malformed_cursor("bad crc"));
        assert_eq!(err.code(), ErrorCode::MalformedCursor);
        let err = OperationError::from(CodecError::UnexpectedEof);
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn display() {
        let err = SchemaViolation::FixedLength {
            field: "code".into(),
            expected: 4,
            actual: 2,
        };
        assert_eq!(err.to_string(), "field code must be exactly 4 long, got 2");
    }
}
