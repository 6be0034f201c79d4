//! Unified error types for rewind.
//!
//! Every display string starts with a stable code so log lines can be
//! grepped and alerted on regardless of the wrapped message.

use tokio_rusqlite::rusqlite;

pub use crate::config::ConfigError;

/// Unified error type for the history cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is missing or invalid; the subsystem must not activate.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// Object store communication failed.
    #[error("BACKEND_ERROR: {0}")]
    Backend(#[from] BackendError),

    /// A persisted record could not be decoded.
    #[error("DECODE_ERROR: {0}")]
    Decode(String),

    /// A response could not be turned into a record.
    #[error("ENCODE_ERROR: {0}")]
    Encode(String),

    /// A retrieve/store predicate failed.
    #[error("POLICY_ERROR: {0}")]
    Policy(#[from] PolicyError),

    /// Strict mode: the request has no stored version.
    #[error("NOT_IN_HISTORY: {0}")]
    NotInHistory(String),

    /// Storage was used outside of an open session.
    #[error("SESSION_CLOSED")]
    SessionClosed,

    /// Live HTTP fetch failed.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),
}

/// Errors raised by object store implementations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Bucket, key or version does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Network or service failure.
    #[error("transport: {0}")]
    Transport(String),

    /// SQLite operation failed.
    #[error("database: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// The store has been closed.
    #[error("store closed")]
    Closed,
}

/// Error raised by a pluggable decision predicate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{policy}: {message}")]
pub struct PolicyError {
    pub policy: String,
    pub message: String,
}

impl PolicyError {
    pub fn new(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self { policy: policy.into(), message: message.into() }
    }
}

impl From<tokio_rusqlite::Error<BackendError>> for BackendError {
    fn from(err: tokio_rusqlite::Error<BackendError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => BackendError::Closed,
            tokio_rusqlite::Error::Close(c) => BackendError::Database(tokio_rusqlite::Error::Close(c)),
            _ => BackendError::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for BackendError {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        BackendError::Database(err)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl BackendError {
    /// Whether the error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotInHistory("GET https://example.com".to_string());
        assert!(err.to_string().contains("NOT_IN_HISTORY"));
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn test_backend_error_wraps() {
        let err: Error = BackendError::Forbidden("bad key".into()).into();
        assert_eq!(err.to_string(), "BACKEND_ERROR: forbidden: bad key");
    }

    #[test]
    fn test_policy_error_display() {
        let err = PolicyError::new("custom", "boom");
        assert_eq!(Error::from(err).to_string(), "POLICY_ERROR: custom: boom");
    }

    #[test]
    fn test_closed_connection_maps_to_closed() {
        let err: BackendError = tokio_rusqlite::Error::<BackendError>::ConnectionClosed.into();
        assert!(matches!(err, BackendError::Closed));
    }
}
