//! Bounded fan-out of a single operation across many target keys
//!
//! [`BatchExecutor`] runs one async operation against a list of target keys,
//! capping how many invocations are in flight at once and collecting exactly
//! one [`TaskResult`] per distinct key. A failing or panicking invocation is
//! recorded into its own result and never disturbs the other targets. An
//! optional aggregate deadline bounds the whole batch; targets still
//! outstanding when it expires are reported as timed out.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::error::{FleetError, FleetResult};
use crate::task::TaskResult;

/// Default cap on concurrent invocations in a batch
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Configuration for batch execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of invocations in flight at once (must be at least 1)
    pub max_workers: usize,
    /// Aggregate deadline for the whole batch; `None` means wait indefinitely
    pub timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_workers: DEFAULT_MAX_WORKERS, timeout: None }
    }
}

impl BatchConfig {
    /// Create a builder for customizing the configuration
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Validate configuration values
    pub fn validate(&self) -> FleetResult<()> {
        if self.max_workers == 0 {
            return Err(FleetError::invalid("max_workers must be at least 1"));
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(FleetError::invalid("timeout must be positive when set"));
            }
        }
        Ok(())
    }
}

/// Builder for [`BatchConfig`]
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    /// Set the maximum number of concurrent invocations
    #[must_use]
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Set an aggregate deadline for the whole batch
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Build the configuration, validating all values
    pub fn build(self) -> FleetResult<BatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Runs one operation across many target keys with bounded concurrency
///
/// The executor holds only configuration, so it is cheap to clone and share.
/// Each call to [`run_batch`](Self::run_batch) is independent.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    /// Create an executor with the given configuration
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Create an executor with default configuration
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// The configuration this executor runs with
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `operation` once per distinct key and collect the results.
    ///
    /// `name` identifies the operation in logs and carries no semantics.
    /// Duplicate keys are collapsed before dispatch, so each distinct key is
    /// invoked exactly once. Results come back in the order the keys were
    /// first seen, regardless of which invocations finish first.
    ///
    /// Every invocation runs on its own worker task behind a semaphore sized
    /// to `max_workers`. An `Err` or a panic inside one invocation becomes a
    /// failed result for that key only. When an aggregate `timeout` is
    /// configured and expires, outstanding workers are aborted and their keys
    /// reported as timed out; an operation that ignores cancellation may
    /// still run to completion in the background, but its result is no
    /// longer observed.
    #[instrument(
        skip(self, keys, operation),
        fields(operation = name, max_workers = self.config.max_workers)
    )]
    pub async fn run_batch<K, F, Fut, T, E>(
        &self,
        name: &str,
        keys: K,
        operation: F,
    ) -> Vec<TaskResult<T>>
    where
        K: IntoIterator,
        K::Item: Into<String>,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let ordered = dedupe_keys(keys);
        let total = ordered.len();
        if total == 0 {
            debug!("Batch '{}' invoked with no keys", name);
            return Vec::new();
        }
        info!("Dispatching batch '{}' across {} targets", name, total);

        let operation = Arc::new(operation);
        // A zero cap would park every worker on the semaphore forever.
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskResult<T>>();

        let mut workers = Vec::with_capacity(total);
        for key in &ordered {
            let task_key = key.clone();
            let operation = Arc::clone(&operation);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                let started = Instant::now();
                // The operation runs on its own task so a panic surfaces as
                // a JoinError here instead of unwinding this worker.
                let outcome = tokio::spawn(operation(task_key.clone())).await;
                let duration = started.elapsed();
                let result = match outcome {
                    Ok(Ok(value)) => TaskResult::ok(task_key, value, duration),
                    Ok(Err(error)) => TaskResult::failed(task_key, error.to_string(), duration),
                    Err(join_error) => {
                        warn!("Worker for '{}' panicked: {}", task_key, join_error);
                        TaskResult::failed(
                            task_key,
                            format!("operation panicked: {join_error}"),
                            duration,
                        )
                    }
                };
                let _ = tx.send(result);
            });
            workers.push((key.clone(), handle));
        }
        drop(tx);

        let mut collected: HashMap<String, TaskResult<T>> = HashMap::with_capacity(total);
        let deadline = self.config.timeout.map(|limit| tokio::time::Instant::now() + limit);
        let mut deadline_hit = false;
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        deadline_hit = true;
                        break;
                    }
                },
                None => rx.recv().await,
            };
            match next {
                Some(result) => {
                    collected.insert(result.key.clone(), result);
                }
                None => break,
            }
        }

        // Every input key gets exactly one result. Keys with no result are
        // aborted and reported, whether the deadline fired or their worker
        // died before sending.
        if collected.len() < total {
            for (key, handle) in &workers {
                if collected.contains_key(key) {
                    continue;
                }
                handle.abort();
                let result = if deadline_hit {
                    let limit = self.config.timeout.unwrap_or_default();
                    warn!("Target '{}' still running at the batch deadline", key);
                    TaskResult::failed(
                        key.clone(),
                        format!("batch timed out after {limit:?}"),
                        limit,
                    )
                } else {
                    TaskResult::failed(
                        key.clone(),
                        "worker terminated unexpectedly".to_string(),
                        Duration::ZERO,
                    )
                };
                collected.insert(key.clone(), result);
            }
        }

        let succeeded = collected.values().filter(|result| result.success).count();
        info!("Batch '{}' complete: {}/{} targets succeeded", name, succeeded, total);

        ordered.iter().filter_map(|key| collected.remove(key)).collect()
    }
}

/// Run one batch with default settings.
///
/// Convenience wrapper over [`BatchExecutor::with_defaults`] for callers that
/// do not need to tune concurrency or set a deadline.
pub async fn run_batch<K, F, Fut, T, E>(name: &str, keys: K, operation: F) -> Vec<TaskResult<T>>
where
    K: IntoIterator,
    K::Item: Into<String>,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    BatchExecutor::with_defaults().run_batch(name, keys, operation).await
}

/// Collapse duplicate keys, preserving first-seen order
fn dedupe_keys<K>(keys: K) -> Vec<String>
where
    K: IntoIterator,
    K::Item: Into<String>,
{
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for key in keys {
        let key = key.into();
        if seen.insert(key.clone()) {
            ordered.push(key);
        }
    }
    ordered
}
