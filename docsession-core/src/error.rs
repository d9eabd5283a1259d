//! Error types and result types for session operations.
//!
//! Errors fall in two groups. Tracking errors ([`SessionError::NotTracked`],
//! [`SessionError::DuplicateTracking`], [`SessionError::TypeMismatch`],
//! [`SessionError::InvalidArgument`]) are contract violations by the caller and are never
//! retried. Round-trip errors ([`SessionError::Concurrency`], [`SessionError::Transport`],
//! [`SessionError::Server`]) are surfaced verbatim so the caller can decide whether to repeat
//! the whole logical operation. In both cases the session state is left as it was before the
//! failing call.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while working with a document session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The id or entity handle was never registered with the session.
    #[error("Document {0} is not tracked by this session")]
    NotTracked(String),
    /// A second, distinct entity was registered under an id that is already tracked.
    #[error("Attempted to track a different entity under id {0}, which is already tracked")]
    DuplicateTracking(String),
    /// The server rejected a batch because a change vector precondition failed.
    #[error("Optimistic concurrency violation on {id}: expected change vector {expected:?}, actual {actual:?}")]
    Concurrency {
        /// The document id whose precondition failed.
        id: String,
        /// The change vector sent with the command.
        expected: Option<String>,
        /// The change vector the server holds, if the document exists.
        actual: Option<String>,
    },
    /// Network, timeout or transport-level failure, passed through from the request executor.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The server answered with an error status.
    #[error("Server error (status code {status}): {message}")]
    Server {
        /// HTTP status code of the failing response.
        status: u16,
        /// Body or description returned by the server.
        message: String,
    },
    /// The session has used up its allowed number of round trips.
    #[error("The maximum number of requests ({max}) allowed for this session has been reached")]
    RequestQuotaExceeded {
        /// The configured maximum.
        max: u32,
    },
    /// An argument failed validation (empty id, empty patch script, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A tracked entity was accessed as a type it is not.
    #[error("Entity {id} is a {actual}, not a {requested}")]
    TypeMismatch {
        /// Id of the tracked entity.
        id: String,
        /// Collection of the tracked entity.
        actual: &'static str,
        /// Collection of the requested type.
        requested: &'static str,
    },
    /// Serialization/deserialization error when converting between entities and JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The server response does not line up with the request that produced it.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl SessionError {
    /// Returns `true` when repeating the whole logical operation may succeed.
    ///
    /// Contract violations are never retryable. Server errors are retryable only for 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Transport(_) | SessionError::Concurrency { .. } => true,
            SessionError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A specialized `Result` type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl From<SerdeJsonError> for SessionError {
    fn from(err: SerdeJsonError) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_errors_are_never_retryable() {
        assert!(!SessionError::NotTracked("users/1".into()).is_retryable());
        assert!(!SessionError::DuplicateTracking("users/1".into()).is_retryable());
        assert!(!SessionError::InvalidArgument("id".into()).is_retryable());
    }

    #[test]
    fn round_trip_errors_are_retryable() {
        assert!(SessionError::Transport("timeout".into()).is_retryable());
        assert!(
            SessionError::Concurrency { id: "a".into(), expected: None, actual: None }.is_retryable()
        );
        assert!(SessionError::Server { status: 503, message: String::new() }.is_retryable());
        assert!(!SessionError::Server { status: 400, message: String::new() }.is_retryable());
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert!(matches!(SessionError::from(err), SessionError::Serialization(_)));
    }
}
