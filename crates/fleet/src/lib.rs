//! Fan-out execution and reporting across fleets of remote targets.
//!
//! Where `convoy-resilience` guards a single operation, this crate runs one
//! operation against many target keys at once and accounts for the outcome:
//!
//! - [`task`]: the per-target result record every executor produces
//! - [`batch`]: all-at-once fan-out with bounded concurrency and an optional
//!   aggregate deadline
//! - [`parallel`]: incremental task submission with explicit lifecycle
//! - [`report`]: batch summaries and pretty-printed JSON report files
//! - [`tracker`]: bounded per-target performance history across batches
//!
//! A failing target never aborts its batch; its error lands in that target's
//! result record. Per-invocation guards compose inside the operation closure
//! handed to the executor.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod batch;
pub mod error;
pub mod parallel;
pub mod report;
pub mod task;
pub mod tracker;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use batch::{run_batch, BatchConfig, BatchConfigBuilder, BatchExecutor, DEFAULT_MAX_WORKERS};
pub use error::{FleetError, FleetResult};
pub use parallel::{run_tasks, ParallelTaskManager};
pub use report::{BatchSummary, DetailedReport};
pub use task::{TaskId, TaskResult};
pub use tracker::{OperationSample, TargetStats, TargetTracker};
