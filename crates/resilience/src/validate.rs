//! Input validation for target identifiers and operation parameters
//!
//! Operations are dispatched against opaque target keys supplied by callers,
//! so malformed identifiers surface as confusing downstream failures unless
//! rejected up front. These validators cover the identifier shapes the fleet
//! layer passes through: hardware target ids, TCP ports, timeout values, and
//! reverse-DNS application bundle ids.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Static target id pattern compiled once at first use
///
/// Accepts the legacy 40-hex form and the dashed 25-character form newer
/// hardware reports (8 hex digits, a dash, 16 hex digits).
static TARGET_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]{40}|[0-9a-fA-F]{8}-[0-9a-fA-F]{16})$")
        .expect("TARGET_ID_REGEX pattern is valid and well-formed")
});

/// Static bundle id pattern compiled once at first use
static BUNDLE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]*[a-zA-Z0-9])?)*$")
        .expect("BUNDLE_ID_REGEX pattern is valid and well-formed")
});

/// Validation failures for caller-supplied inputs
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The target id matches neither accepted form
    #[error("Invalid target id '{value}': expected 40 hex characters or the dashed 25-character form")]
    InvalidTargetId {
        /// The rejected input
        value: String,
    },

    /// The port is outside `1..=65535`
    #[error("Invalid port {value}: expected a value between 1 and 65535")]
    InvalidPort {
        /// The rejected input
        value: u32,
    },

    /// The timeout is not a positive finite number of seconds
    #[error("Invalid timeout {value}: expected a positive finite number of seconds")]
    InvalidTimeout {
        /// The rejected input
        value: f64,
    },

    /// The bundle id is not a well-formed reverse-DNS identifier
    #[error("Invalid bundle id '{value}'")]
    InvalidBundleId {
        /// The rejected input
        value: String,
    },
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a hardware target identifier
///
/// Accepts 40 hexadecimal characters or the dashed 25-character form
/// (`XXXXXXXX-XXXXXXXXXXXXXXXX`), case-insensitive in both shapes.
pub fn validate_target_id(id: &str) -> ValidationResult<()> {
    if TARGET_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTargetId { value: id.to_string() })
    }
}

/// Validate a TCP port, narrowing it to `u16` on success
pub fn validate_port(port: u32) -> ValidationResult<u16> {
    match u16::try_from(port) {
        Ok(narrowed) if narrowed >= 1 => Ok(narrowed),
        _ => Err(ValidationError::InvalidPort { value: port }),
    }
}

/// Validate a timeout in seconds, converting it to a [`Duration`] on success
///
/// Rejects non-finite and non-positive values, and finite values too large
/// to represent as a [`Duration`].
pub fn validate_timeout(seconds: f64) -> ValidationResult<Duration> {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| ValidationError::InvalidTimeout { value: seconds })
    } else {
        Err(ValidationError::InvalidTimeout { value: seconds })
    }
}

/// Validate a reverse-DNS application bundle id
///
/// Segments are dot-separated, alphanumeric with interior hyphens, and may
/// not start or end with a hyphen.
pub fn validate_bundle_id(bundle_id: &str) -> ValidationResult<()> {
    if BUNDLE_ID_REGEX.is_match(bundle_id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidBundleId { value: bundle_id.to_string() })
    }
}
