//! Per-target performance history
//!
//! [`TargetTracker`] accumulates operation timings and outcomes per target
//! key across batches, answering "how has this target been behaving lately".
//! History is bounded per key so long-running sessions do not grow without
//! limit. Cloning the tracker shares the underlying map, so the same
//! instance can be fed from several workers at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::task::{duration_secs, TaskResult};

/// Most samples retained per target
const MAX_SAMPLES: usize = 100;

/// Samples included in a stats snapshot
const RECENT_SAMPLES: usize = 10;

/// One recorded operation against one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSample {
    /// Name of the operation that ran
    pub operation: String,
    /// Wall-clock time the operation took
    #[serde(with = "duration_secs", rename = "duration_seconds")]
    pub duration: Duration,
    /// Whether the operation succeeded
    pub success: bool,
    /// When the sample was recorded
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
struct TargetMetrics {
    samples: Vec<OperationSample>,
    total_time: Duration,
    success_count: u64,
    failure_count: u64,
}

/// Stats snapshot for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetStats {
    /// Total operations recorded against this target
    pub total_operations: u64,
    /// Fraction of operations that succeeded, between 0 and 1
    pub success_rate: f64,
    /// Mean seconds per operation
    pub avg_duration_secs: f64,
    /// Total seconds spent operating on this target
    pub total_time_secs: f64,
    /// The most recent samples, oldest first
    pub recent: Vec<OperationSample>,
}

/// Tracks operation outcomes and timings per target key
///
/// All methods take `&self`; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct TargetTracker {
    targets: Arc<DashMap<String, TargetMetrics>>,
}

impl TargetTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation outcome for a target.
    ///
    /// Only the most recent samples are retained per target; totals keep
    /// counting past the retention window.
    pub fn record(
        &self,
        key: impl Into<String>,
        operation: impl Into<String>,
        duration: Duration,
        success: bool,
    ) {
        let sample = OperationSample {
            operation: operation.into(),
            duration,
            success,
            at: Utc::now(),
        };
        let mut metrics = self.targets.entry(key.into()).or_default();
        metrics.total_time += duration;
        if success {
            metrics.success_count += 1;
        } else {
            metrics.failure_count += 1;
        }
        metrics.samples.push(sample);
        if metrics.samples.len() > MAX_SAMPLES {
            let excess = metrics.samples.len() - MAX_SAMPLES;
            metrics.samples.drain(..excess);
        }
    }

    /// Record a task result under its own key
    pub fn record_result<T>(&self, operation: impl Into<String>, result: &TaskResult<T>) {
        self.record(result.key.clone(), operation, result.duration, result.success);
    }

    /// Stats snapshot for one target, if anything was recorded for it
    pub fn target_stats(&self, key: &str) -> Option<TargetStats> {
        self.targets.get(key).map(|metrics| stats_of(&metrics))
    }

    /// Stats snapshots for every tracked target
    pub fn all_stats(&self) -> HashMap<String, TargetStats> {
        self.targets
            .iter()
            .map(|entry| (entry.key().clone(), stats_of(entry.value())))
            .collect()
    }

    /// Full retained sample history for one target, oldest first
    pub fn history(&self, key: &str) -> Vec<OperationSample> {
        self.targets
            .get(key)
            .map(|metrics| metrics.samples.clone())
            .unwrap_or_default()
    }

    /// Forget one target's history; returns whether it existed
    pub fn remove(&self, key: &str) -> bool {
        self.targets.remove(key).is_some()
    }

    /// Forget every target
    pub fn clear(&self) {
        self.targets.clear();
    }

    /// Number of targets with recorded history
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

fn stats_of(metrics: &TargetMetrics) -> TargetStats {
    let total = metrics.success_count + metrics.failure_count;
    let success_rate = if total == 0 {
        0.0
    } else {
        metrics.success_count as f64 / total as f64
    };
    let total_time_secs = metrics.total_time.as_secs_f64();
    let avg_duration_secs = if total == 0 { 0.0 } else { total_time_secs / total as f64 };
    let start = metrics.samples.len().saturating_sub(RECENT_SAMPLES);
    TargetStats {
        total_operations: total,
        success_rate,
        avg_duration_secs,
        total_time_secs,
        recent: metrics.samples[start..].to_vec(),
    }
}
