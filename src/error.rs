//! Error types for fetch-dispatch
//!
//! Most failures in this crate are represented as data rather than errors:
//! a failed request becomes a [`Response`](crate::types::Response) with status 0
//! or an error status, and a failed background task becomes
//! [`TaskState::Failed`](crate::types::TaskState::Failed). The types here cover
//! what is left over:
//! - [`Error`] for configuration and limiter failures
//! - [`TransportError`] for faults reported by a [`Transport`](crate::transport::Transport)
//! - [`RetryError`] for the outcome of [`retry_with_backoff`](crate::retry::retry_with_backoff)

use std::time::Duration;
use thiserror::Error;

/// Result type alias for fetch-dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fetch-dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_connections")
        key: Option<String>,
    },

    /// The concurrency limiter was closed while waiting for a permit
    #[error("concurrency limiter closed")]
    LimiterClosed,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Transport-layer fault reported by a [`Transport`](crate::transport::Transport)
///
/// Every variant is a transient fault: the fetch client retries it according to
/// its backoff policy. Application-level rejections (status >= 400) are not
/// errors at this layer, they arrive as a normal
/// [`RawResponse`](crate::transport::RawResponse).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not establish or keep a connection (refused, reset, DNS failure)
    #[error("connection error: {0}")]
    Connect(String),

    /// The attempt did not complete within its timeout
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The remote spoke something we could not understand
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A successful response body could not be decoded for its content type
    #[error("failed to decode response body: {0}")]
    Decode(String),

    /// Any other transport failure
    #[error("{0}")]
    Other(String),
}

/// Outcome of a retry loop that did not produce a value
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error classified as non-retryable
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a retryable error
    #[error("{last} (after {attempts} attempts)")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        last: E,
    },

    /// Cancellation was requested before the operation could succeed
    #[error("operation cancelled after {attempts} attempts")]
    Cancelled {
        /// Number of attempts started before cancellation was observed
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// The last error produced by the operation, if any
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Permanent(e) => Some(e),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled { .. } => None,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_keeps_key() {
        let err = Error::config("max_connections", "must be at least 1");
        match &err {
            Error::Config { message, key } => {
                assert_eq!(message, "must be at least 1");
                assert_eq!(key.as_deref(), Some("max_connections"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(err.to_string(), "configuration error: must be at least 1");
    }

    #[test]
    fn timeout_display_uses_milliseconds() {
        let err = TransportError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "request timed out after 1500ms");
    }

    #[test]
    fn retry_error_exposes_last_error() {
        let exhausted = RetryError::Exhausted {
            attempts: 4,
            last: TransportError::Connect("reset".into()),
        };
        assert_eq!(
            exhausted.last_error(),
            Some(&TransportError::Connect("reset".into()))
        );
        assert_eq!(
            exhausted.to_string(),
            "connection error: reset (after 4 attempts)"
        );

        let cancelled: RetryError<TransportError> = RetryError::Cancelled { attempts: 1 };
        assert!(cancelled.last_error().is_none());
    }
}
