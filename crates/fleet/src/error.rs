//! Error types for the fleet layer

use thiserror::Error;

/// Errors surfaced by the fleet layer itself
///
/// Per-target operation failures never appear here; they are captured into
/// the failing target's result record. These variants cover infrastructure
/// problems with the batch machinery and report output.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The task manager has been shut down and accepts no new work
    #[error("Task manager is shut down")]
    ManagerClosed,

    /// A configuration value failed validation
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// What was wrong with the configuration
        message: String,
    },

    /// Writing a report to disk failed
    #[error("Failed to write report: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Serializing a report failed
    #[error("Failed to serialize report: {source}")]
    Serialization {
        /// The underlying serialization error
        #[from]
        source: serde_json::Error,
    },
}

impl FleetError {
    /// Shorthand used by config builders when a value fails validation
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration { message: message.into() }
    }
}

/// Result type for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;
