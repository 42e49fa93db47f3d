//! Per-target task outcomes
//!
//! A batch run produces exactly one [`TaskResult`] per target key. The record
//! carries either the operation's value or its error rendered to a string,
//! never both, plus the wall-clock duration of the attempt that produced it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serde helpers for durations as fractional seconds
///
/// Reports are consumed by external tooling that expects plain numbers of
/// seconds rather than a `{secs, nanos}` pair.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as fractional seconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize fractional seconds into a duration
    ///
    /// Negative, non-finite, and out-of-range values surface as
    /// deserialization errors.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| serde::de::Error::custom(format!("invalid duration in seconds: {seconds}")))
    }
}

/// Identifier for a task submitted to a [`ParallelTaskManager`]
///
/// [`ParallelTaskManager`]: crate::parallel::ParallelTaskManager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}", self.0.simple())
    }
}

/// One outcome per (target key, operation)
///
/// Exactly one of `value` and `error` is populated; the constructors are the
/// only way these records are built, so the invariant holds throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult<T> {
    /// The target this outcome belongs to
    pub key: String,
    /// Whether the operation produced a value
    pub success: bool,
    /// The operation's value, present iff `success`
    pub value: Option<T>,
    /// The operation's error rendered to a string, present iff not `success`
    pub error: Option<String>,
    /// Wall-clock time of the attempt that produced this outcome
    #[serde(with = "duration_secs", rename = "duration_seconds")]
    pub duration: Duration,
}

impl<T> TaskResult<T> {
    /// Build a successful outcome
    pub fn ok(key: impl Into<String>, value: T, duration: Duration) -> Self {
        Self { key: key.into(), success: true, value: Some(value), error: None, duration }
    }

    /// Build a failed outcome
    pub fn failed(key: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self { key: key.into(), success: false, value: None, error: Some(error.into()), duration }
    }

    /// Whether the operation produced a value
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Wall-clock time of the attempt as fractional seconds
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// Consume the record, yielding the value if there is one
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}
