//! Incremental task submission with bounded concurrency
//!
//! [`ParallelTaskManager`] complements the all-at-once batch executor for
//! callers that discover work over time: tasks are submitted individually,
//! run under a shared worker cap, and joined later in one or more waits.
//! Results accumulate on the manager until it is dropped, so staged
//! submission rounds can be reported together.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::batch::DEFAULT_MAX_WORKERS;
use crate::error::{FleetError, FleetResult};
use crate::task::{TaskId, TaskResult};

type TaskEntry<T> = (TaskId, String, JoinHandle<TaskResult<T>>);

/// Accepts tasks one at a time and runs them under a shared concurrency cap
///
/// Submission never blocks: each task is spawned immediately and parks on an
/// internal semaphore until a worker slot frees up. Joining happens in
/// submission order, so a finished task behind a straggler is picked up by
/// the next wait call. Dropping the manager aborts any tasks still pending.
#[derive(Debug)]
pub struct ParallelTaskManager<T>
where
    T: Send + 'static,
{
    semaphore: Arc<Semaphore>,
    tasks: Mutex<Vec<TaskEntry<T>>>,
    results: Mutex<Vec<TaskResult<T>>>,
    closed: AtomicBool,
}

impl<T> ParallelTaskManager<T>
where
    T: Send + 'static,
{
    /// Create a manager allowing up to `max_workers` tasks to run at once.
    ///
    /// A cap of zero is raised to one, since no submission could ever run
    /// under it.
    pub fn new(max_workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            tasks: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Submit one task for execution.
    ///
    /// The operation starts as soon as a worker slot is free. An `Err`
    /// outcome is captured into a failed [`TaskResult`] under `key`; a panic
    /// is captured the same way when the task is joined. Returns the task's
    /// id, or [`FleetError::ManagerClosed`] after [`shutdown`](Self::shutdown).
    pub fn submit<Fut, E>(&self, key: impl Into<String>, operation: Fut) -> FleetResult<TaskId>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FleetError::ManagerClosed);
        }
        let key = key.into();
        let id = TaskId::new();
        let semaphore = Arc::clone(&self.semaphore);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return TaskResult::failed(
                    task_key,
                    "worker pool shut down".to_string(),
                    Duration::ZERO,
                );
            };
            let started = Instant::now();
            match operation.await {
                Ok(value) => TaskResult::ok(task_key, value, started.elapsed()),
                Err(error) => TaskResult::failed(task_key, error.to_string(), started.elapsed()),
            }
        });
        debug!("Submitted task '{}' as {}", key, id);
        self.lock_tasks().push((id, key, handle));
        Ok(id)
    }

    /// Join every pending task and return a snapshot of all results so far.
    ///
    /// Results from earlier waits are included; the manager keeps the full
    /// list until it is dropped.
    pub async fn wait_all(&self) -> Vec<TaskResult<T>>
    where
        T: Clone,
    {
        self.drain_pending().await;
        self.lock_results().clone()
    }

    /// Join pending tasks until `limit` expires.
    ///
    /// Returns `true` when every pending task was joined in time. On
    /// expiry the unjoined tasks stay pending for a later wait and `false`
    /// is returned; nothing is aborted.
    pub async fn wait_all_for(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        let pending: Vec<TaskEntry<T>> = self.lock_tasks().drain(..).collect();
        let mut leftover = Vec::new();
        let mut expired = false;
        for (id, key, mut handle) in pending {
            if expired {
                leftover.push((id, key, handle));
                continue;
            }
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(joined) => self.record_joined(key, joined),
                Err(_) => {
                    expired = true;
                    leftover.push((id, key, handle));
                }
            }
        }
        if leftover.is_empty() {
            true
        } else {
            warn!("{} tasks still pending after waiting {:?}", leftover.len(), limit);
            self.lock_tasks().extend(leftover);
            false
        }
    }

    /// Snapshot of every result recorded so far
    pub fn results(&self) -> Vec<TaskResult<T>>
    where
        T: Clone,
    {
        self.lock_results().clone()
    }

    /// Number of submitted tasks not yet joined
    pub fn pending_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Whether the manager has been shut down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting submissions and drain every pending task.
    ///
    /// In-flight tasks run to completion and their results are recorded;
    /// only new submissions are rejected. Idempotent.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained = self.drain_pending().await;
        info!("Task manager closed after draining {} tasks", drained);
    }

    /// Cancel every pending task and record a result for each.
    ///
    /// A task that finished before the cancellation landed keeps its real
    /// result; the rest are recorded as failed with a cancellation message.
    pub async fn abort_pending(&self) {
        let pending: Vec<TaskEntry<T>> = self.lock_tasks().drain(..).collect();
        for (_id, key, handle) in pending {
            handle.abort();
            let joined = handle.await;
            self.record_joined(key, joined);
        }
    }

    async fn drain_pending(&self) -> usize {
        let pending: Vec<TaskEntry<T>> = self.lock_tasks().drain(..).collect();
        let drained = pending.len();
        for (_id, key, handle) in pending {
            let joined = handle.await;
            self.record_joined(key, joined);
        }
        drained
    }

    fn record_joined(&self, key: String, joined: Result<TaskResult<T>, JoinError>) {
        let result = match joined {
            Ok(result) => result,
            Err(join_error) => {
                warn!("Task for '{}' did not complete: {}", key, join_error);
                TaskResult::failed(key, panic_message(join_error), Duration::ZERO)
            }
        };
        self.lock_results().push(result);
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<TaskEntry<T>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Task list lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_results(&self) -> MutexGuard<'_, Vec<TaskResult<T>>> {
        match self.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Result list lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl<T> Default for ParallelTaskManager<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl<T> Drop for ParallelTaskManager<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_id, _key, handle) in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

/// Submit one task per key and wait for the whole set in a single call.
///
/// Convenience wrapper over [`ParallelTaskManager`] for callers that have
/// all their keys up front. When `timeout` is set and expires, stragglers
/// are cancelled and reported as failed results, so the returned list still
/// covers every key.
pub async fn run_tasks<K, F, Fut, T, E>(
    keys: K,
    max_workers: usize,
    timeout: Option<Duration>,
    operation: F,
) -> Vec<TaskResult<T>>
where
    K: IntoIterator,
    K::Item: Into<String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let manager = ParallelTaskManager::new(max_workers);
    for key in keys {
        let key = key.into();
        let future = operation(key.clone());
        // The manager was just created, so submission cannot be rejected.
        let _ = manager.submit(key, future);
    }
    match timeout {
        Some(limit) => {
            if !manager.wait_all_for(limit).await {
                manager.abort_pending().await;
            }
        }
        None => {
            let _ = manager.wait_all().await;
        }
    }
    manager.results()
}

/// Render a join failure as a result error message
fn panic_message(error: JoinError) -> String {
    if error.is_panic() {
        let payload = error.into_panic();
        if let Some(message) = payload.downcast_ref::<&str>() {
            format!("task panicked: {message}")
        } else if let Some(message) = payload.downcast_ref::<String>() {
            format!("task panicked: {message}")
        } else {
            "task panicked with a non-string payload".to_string()
        }
    } else {
        "task was cancelled".to_string()
    }
}
