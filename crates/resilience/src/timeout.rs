//! Timeout guarding with duration history and timeout suggestions
//!
//! [`TimeoutGuard`] runs an operation on its own task and waits for it with a
//! deadline. A worker that misses the deadline is left to finish detached; the
//! caller gets a timeout error without blocking on cancellation. Observed
//! durations are recorded per operation name so callers can ask for a
//! data-driven timeout suggestion instead of guessing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ResilienceError, ResilienceResult};

/// Default deadline applied when the caller does not pass one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor for suggested timeouts
const MIN_SUGGESTED: Duration = Duration::from_secs(1);

/// History length that triggers a trim
const MAX_HISTORY: usize = 100;

/// Entries kept after a trim
const TRIMMED_HISTORY: usize = 50;

/// Duration statistics for one operation name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutStats {
    /// Number of recorded runs
    pub count: usize,
    /// Mean duration across the recorded runs
    pub average: Duration,
    /// Shortest recorded duration
    pub min: Duration,
    /// Longest recorded duration
    pub max: Duration,
    /// Suggested timeout derived from the average
    pub suggested: Duration,
}

/// Deadline enforcement for individual operations
///
/// Durations are recorded on every outcome, including timeouts, so the
/// history reflects what callers actually waited. Generic over [`Clock`] so
/// the bookkeeping can be driven deterministically in tests.
#[derive(Debug)]
pub struct TimeoutGuard<C: Clock = SystemClock> {
    default_timeout: Duration,
    history: Arc<Mutex<HashMap<String, Vec<Duration>>>>,
    clock: C,
}

impl TimeoutGuard {
    /// Create a guard with the given default deadline
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_clock(default_timeout, SystemClock)
    }

    /// Create a guard with the stock 30-second default deadline
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl<C: Clock> TimeoutGuard<C> {
    /// Create a guard with a custom clock
    pub fn with_clock(default_timeout: Duration, clock: C) -> Self {
        Self { default_timeout, history: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// The deadline used by [`run`](Self::run)
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run an operation under the default deadline
    pub async fn run<Fut, T, E>(&self, name: &str, operation: Fut) -> ResilienceResult<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_with(name, self.default_timeout, operation).await
    }

    /// Run an operation under an explicit deadline
    ///
    /// The operation is spawned onto the runtime and joined with a timeout.
    /// On deadline the worker keeps running detached; there is no forced
    /// cancellation. A panic on the worker surfaces as
    /// [`ResilienceError::WorkerPanicked`].
    #[instrument(skip(self, operation), fields(operation = name))]
    pub async fn run_with<Fut, T, E>(
        &self,
        name: &str,
        limit: Duration,
        operation: Fut,
    ) -> ResilienceResult<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let start = self.clock.now();
        let handle = tokio::spawn(operation);
        let outcome = tokio::time::timeout(limit, handle).await;

        let elapsed = self.clock.now().duration_since(start);
        self.record(name, elapsed);

        match outcome {
            Ok(Ok(Ok(value))) => {
                debug!("Operation completed in {:?}", elapsed);
                Ok(value)
            }
            Ok(Ok(Err(error))) => Err(ResilienceError::OperationFailed { source: error }),
            Ok(Err(join_error)) => {
                let message = panic_message(join_error);
                warn!("Worker for '{}' panicked: {}", name, message);
                Err(ResilienceError::WorkerPanicked { message })
            }
            Err(_) => {
                warn!("Operation '{}' timed out after {:?}", name, limit);
                Err(ResilienceError::Timeout { limit })
            }
        }
    }

    /// Run a blocking operation under an explicit deadline
    ///
    /// Synchronous twin of [`run_with`](Self::run_with). The operation runs
    /// on a dedicated thread; if the deadline passes the thread is left to
    /// finish on its own.
    #[instrument(skip(self, operation), fields(operation = name))]
    pub fn run_blocking<F, T, E>(
        &self,
        name: &str,
        limit: Duration,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let start = self.clock.now();
        let (tx, rx) = std::sync::mpsc::channel();

        // The handle is dropped on purpose: a worker that outlives the
        // deadline finishes detached.
        let _detached = std::thread::spawn(move || {
            let _ = tx.send(operation());
        });

        let outcome = rx.recv_timeout(limit);
        let elapsed = self.clock.now().duration_since(start);
        self.record(name, elapsed);

        match outcome {
            Ok(result) => result.map_err(|error| ResilienceError::OperationFailed { source: error }),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                warn!("Operation '{}' timed out after {:?}", name, limit);
                Err(ResilienceError::Timeout { limit })
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                warn!("Worker thread for '{}' exited without a result", name);
                Err(ResilienceError::WorkerPanicked {
                    message: "worker thread exited without producing a result".to_string(),
                })
            }
        }
    }

    /// Duration statistics for one operation name
    ///
    /// Returns `None` when nothing has been recorded under the name.
    pub fn stats_for(&self, name: &str) -> Option<TimeoutStats> {
        let history = self.lock_history();
        let entries = history.get(name)?;
        Self::summarize(entries, self.default_timeout)
    }

    /// Duration statistics for every recorded operation name
    pub fn stats(&self) -> HashMap<String, TimeoutStats> {
        let history = self.lock_history();
        history
            .iter()
            .filter_map(|(name, entries)| {
                Self::summarize(entries, self.default_timeout).map(|s| (name.clone(), s))
            })
            .collect()
    }

    /// Data-driven timeout suggestion for an operation name
    ///
    /// Three times the observed average, capped at twice the default deadline
    /// and floored at one second. Falls back to the default deadline when no
    /// history exists.
    pub fn suggested_timeout(&self, name: &str) -> Duration {
        self.stats_for(name).map_or(self.default_timeout, |s| s.suggested)
    }

    fn summarize(entries: &[Duration], default_timeout: Duration) -> Option<TimeoutStats> {
        if entries.is_empty() {
            return None;
        }

        let total: Duration = entries.iter().sum();
        let count = entries.len();
        let average = total / count as u32;
        let min = *entries.iter().min()?;
        let max = *entries.iter().max()?;
        let suggested = average.saturating_mul(3).min(default_timeout.saturating_mul(2)).max(MIN_SUGGESTED);

        Some(TimeoutStats { count, average, min, max, suggested })
    }

    fn record(&self, name: &str, elapsed: Duration) {
        let mut history = self.lock_history();
        let entries = history.entry(name.to_string()).or_default();
        entries.push(elapsed);
        if entries.len() > MAX_HISTORY {
            let excess = entries.len() - TRIMMED_HISTORY;
            entries.drain(..excess);
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Duration>>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Timeout history lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Extract a readable message from a join failure
fn panic_message(error: tokio::task::JoinError) -> String {
    if error.is_panic() {
        let payload = error.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked with a non-string payload".to_string()
        }
    } else {
        "worker task was cancelled".to_string()
    }
}
