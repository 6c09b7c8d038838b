//! Error types for the meta server.

use configstore_core::{CoreError, ErrorCode, MetaOperationResultError, OperationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by the meta service.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request could not be decoded or exceeds a server limit.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request decoded but names something invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Addressed entity or subscriber does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Watch cursor is no longer retained.
    #[error("watch cursor {0} expired")]
    CursorExpired(u64),

    /// Server is shutting down or faulted.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Store error with no client-facing category.
    #[error("store error: {0}")]
    Core(CoreError),
}

impl ServerError {
    /// Returns true if the client caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::InvalidArgument(_)
                | ServerError::NotFound(_)
                | ServerError::AlreadyExists(_)
                | ServerError::CursorExpired(_)
        )
    }

    /// Returns true if the server is at fault.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Unavailable(_) | ServerError::Internal(_) | ServerError::Core(_)
        )
    }

    /// Status reported to remote callers.
    pub fn status(&self) -> ErrorStatus {
        match self {
            ServerError::InvalidRequest(_) | ServerError::InvalidArgument(_) => {
                ErrorStatus::InvalidArgument
            }
            ServerError::NotFound(_) => ErrorStatus::NotFound,
            ServerError::AlreadyExists(_) => ErrorStatus::AlreadyExists,
            ServerError::CursorExpired(_) => ErrorStatus::FailedPrecondition,
            ServerError::Unavailable(_) => ErrorStatus::Unavailable,
            ServerError::Internal(_) | ServerError::Core(_) => ErrorStatus::Internal,
        }
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CursorExpired { cursor } => ServerError::CursorExpired(cursor),
            CoreError::SubscriberNotFound { .. } => ServerError::NotFound(err.to_string()),
            CoreError::StoreFaulted => ServerError::Unavailable(err.to_string()),
            CoreError::UnknownKind { .. }
            | CoreError::UnknownIndex { .. }
            | CoreError::InvalidOperation { .. } => ServerError::InvalidArgument(err.to_string()),
            other => ServerError::Core(other),
        }
    }
}

impl From<OperationError> for ServerError {
    fn from(err: OperationError) -> Self {
        ServerError::from(MetaOperationResultError::from(&err))
    }
}

impl From<MetaOperationResultError> for ServerError {
    fn from(err: MetaOperationResultError) -> Self {
        let message = err.error_message;
        match err.code {
            ErrorCode::SchemaViolation | ErrorCode::MalformedCursor => {
                ServerError::InvalidArgument(message)
            }
            ErrorCode::NotFound => ServerError::NotFound(message),
            ErrorCode::AlreadyExists => ServerError::AlreadyExists(message),
            ErrorCode::Internal => ServerError::Internal(message),
        }
    }
}

/// Status category carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStatus {
    /// Bad request or argument.
    InvalidArgument,
    /// Missing entity or subscriber.
    NotFound,
    /// Entity already exists.
    AlreadyExists,
    /// Request cannot succeed in the current state.
    FailedPrecondition,
    /// Server cannot take requests.
    Unavailable,
    /// Server fault.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_core::{Key, PartitionId, PathElement};

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::CursorExpired(4).is_client_error());
    }

    #[test]
    fn operation_errors_map_to_statuses() {
        let key = Key::top_level(PartitionId::default(), PathElement::with_id("User", 1));
        let err = ServerError::from(OperationError::not_found(&key));
        assert!(matches!(err, ServerError::NotFound(_)));
        assert_eq!(err.status(), ErrorStatus::NotFound);

        let err = ServerError::from(OperationError::MalformedCursor {
            message: "bad crc".into(),
        });
        assert_eq!(err.status(), ErrorStatus::InvalidArgument);
    }

    #[test]
    fn core_errors_map_to_statuses() {
        assert!(matches!(
            ServerError::from(CoreError::CursorExpired { cursor: 7 }),
            ServerError::CursorExpired(7)
        ));
        assert_eq!(
            ServerError::from(CoreError::StoreFaulted).status(),
            ErrorStatus::Unavailable
        );
        assert!(ServerError::from(CoreError::store_corruption("x")).is_server_error());
    }
}
