//! Aggregated batch summaries and JSON report output
//!
//! A [`BatchSummary`] condenses a slice of task results into the counters an
//! operator cares about: totals, success rate, time spent, and which keys
//! failed. [`DetailedReport`] pairs the summary with the full per-target
//! result rows. Both serialize to pretty-printed JSON for archival next to
//! run logs.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetResult;
use crate::task::TaskResult;

/// Aggregate outcome of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Name of the operation the batch ran
    pub operation: String,
    /// Number of targets in the batch
    pub total: usize,
    /// Number of targets that succeeded
    pub succeeded: usize,
    /// Number of targets that failed
    pub failed: usize,
    /// Percentage of targets that succeeded, rounded to two decimals
    pub success_rate: f64,
    /// Wall-clock seconds spent across all targets, rounded to two decimals
    pub total_duration_secs: f64,
    /// Mean seconds per target, rounded to two decimals
    pub avg_duration_secs: f64,
    /// Keys of the targets that failed, in result order
    pub failed_keys: Vec<String>,
    /// When this summary was generated
    pub generated_at: DateTime<Utc>,
}

impl BatchSummary {
    /// Summarize a slice of task results under an operation name.
    ///
    /// An empty slice produces a zeroed summary with a 0.0 success rate.
    pub fn from_results<T>(operation: impl Into<String>, results: &[TaskResult<T>]) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|result| result.success).count();
        let failed = total - succeeded;
        let success_rate = if total == 0 {
            0.0
        } else {
            round2(succeeded as f64 / total as f64 * 100.0)
        };
        let total_duration: f64 = results.iter().map(TaskResult::duration_secs).sum();
        let avg_duration = if total == 0 { 0.0 } else { total_duration / total as f64 };
        let failed_keys = results
            .iter()
            .filter(|result| !result.success)
            .map(|result| result.key.clone())
            .collect();

        Self {
            operation: operation.into(),
            total,
            succeeded,
            failed,
            success_rate,
            total_duration_secs: round2(total_duration),
            avg_duration_secs: round2(avg_duration),
            failed_keys,
            generated_at: Utc::now(),
        }
    }

    /// Write this summary as pretty-printed JSON to `path`
    pub fn write_json(&self, path: impl AsRef<Path>) -> FleetResult<()> {
        write_pretty_json(path, self)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} succeeded ({:.2}%) in {:.2}s",
            self.operation, self.succeeded, self.total, self.success_rate, self.total_duration_secs
        )
    }
}

/// A batch summary together with every per-target result row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedReport<T> {
    /// Aggregate counters for the batch
    pub summary: BatchSummary,
    /// One row per target, as returned by the executor
    pub results: Vec<TaskResult<T>>,
}

impl<T> DetailedReport<T> {
    /// Build a report from a batch's results, consuming them
    pub fn new(operation: impl Into<String>, results: Vec<TaskResult<T>>) -> Self {
        let summary = BatchSummary::from_results(operation, &results);
        Self { summary, results }
    }

    /// Write this report as pretty-printed JSON to `path`
    pub fn write_json(&self, path: impl AsRef<Path>) -> FleetResult<()>
    where
        T: Serialize,
    {
        write_pretty_json(path, self)
    }
}

fn write_pretty_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> FleetResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
