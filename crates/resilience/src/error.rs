//! Error taxonomy for guarded operations
//!
//! Guards wrap caller-supplied operations, so the central error type is
//! generic over the operation's own error `E` and preserves it as a
//! `source` while adding the guard-specific failure modes: rejected by an
//! open breaker, deadline elapsed, pool at capacity, or a panicked worker.

use std::time::Duration;

use thiserror::Error;

/// Simple configuration error for builder validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value failed validation
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What was wrong with the configuration
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by the guards wrapping an operation
///
/// Generic over the underlying operation error type `E` so the original
/// failure is preserved and inspectable through `source()`.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open; the operation was not invoked
    #[error("Circuit breaker is open, rejecting calls")]
    BreakerOpen,

    /// The operation did not complete within the allowed time
    #[error("Operation timed out after {limit:?}")]
    Timeout {
        /// The deadline that elapsed
        limit: Duration,
    },

    /// The worker running the operation panicked
    #[error("Operation worker panicked: {message}")]
    WorkerPanicked {
        /// Panic payload rendered as text
        message: String,
    },

    /// The underlying operation failed
    #[error("Operation failed")]
    OperationFailed {
        /// The operation's own error
        #[source]
        source: E,
    },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// What was wrong with the configuration
        message: String,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// True when the wrapped operation was never invoked (breaker rejection)
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::BreakerOpen)
    }

    /// True when the error is a guard-level deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Extract the operation's own error, if that is what this is
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for guarded operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Errors raised by the resource pool itself
///
/// Pool operations carry no wrapped operation, so this enum is not generic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is at capacity and holds no reusable record
    #[error("Resource pool exhausted: {capacity} records in use")]
    Exhausted {
        /// Configured maximum number of records
        capacity: usize,
    },

    /// The pool has been closed; no further acquisitions are possible
    #[error("Resource pool is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom: {0}")]
    struct TestError(String);

    /// Validates `ResilienceError` display output for each variant.
    ///
    /// Assertions:
    /// - Confirms the breaker rejection message.
    /// - Confirms the timeout message carries the limit.
    /// - Confirms pool exhaustion reports the capacity.
    #[test]
    fn test_error_display() {
        let open: ResilienceError<TestError> = ResilienceError::BreakerOpen;
        assert_eq!(open.to_string(), "Circuit breaker is open, rejecting calls");

        let timeout: ResilienceError<TestError> =
            ResilienceError::Timeout { limit: Duration::from_secs(5) };
        assert!(timeout.to_string().contains("5s"));

        let exhausted = PoolError::Exhausted { capacity: 10 };
        assert!(exhausted.to_string().contains("10"));
    }

    /// Validates the operation error survives wrapping as a `source`.
    ///
    /// Assertions:
    /// - Confirms `source()` exposes the original error text.
    /// - Confirms `into_operation_error` recovers ownership of it.
    #[test]
    fn test_operation_error_preserved() {
        use std::error::Error as _;

        let wrapped: ResilienceError<TestError> =
            ResilienceError::OperationFailed { source: TestError("device unreachable".into()) };

        let source = wrapped.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("boom: device unreachable"));

        let inner = wrapped.into_operation_error();
        assert_eq!(inner.map(|e| e.0), Some("device unreachable".to_string()));
    }

    /// Validates the classification helpers distinguish rejection from
    /// timeout.
    ///
    /// Assertions:
    /// - Confirms `is_rejection` only for `BreakerOpen`.
    /// - Confirms `is_timeout` only for `Timeout`.
    #[test]
    fn test_error_classification() {
        let open: ResilienceError<TestError> = ResilienceError::BreakerOpen;
        assert!(open.is_rejection());
        assert!(!open.is_timeout());

        let timeout: ResilienceError<TestError> =
            ResilienceError::Timeout { limit: Duration::from_millis(100) };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_rejection());
    }
}
