//! Probe-based health aggregation
//!
//! [`HealthAggregator`] owns a registry of named boolean probes. Each run
//! executes every probe concurrently under its own deadline, updates
//! per-check consecutive success/failure counters, classifies overall health
//! from the fraction of probes that passed, and appends the outcome to a
//! bounded history. Probe panics and timeouts count as probe failures, never
//! as aggregator failures.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, instrument, warn};

/// History length that triggers a trim
const HISTORY_MAX: usize = 1000;

/// Entries kept after a trim
const HISTORY_KEEP: usize = 500;

/// Fraction of passing probes at or above which the system is healthy
const HEALTHY_RATIO: f64 = 0.9;

/// Fraction of passing probes at or above which the system is degraded
/// rather than unhealthy
const DEGRADED_RATIO: f64 = 0.5;

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// At least 90% of probes passed
    Healthy,
    /// At least 50% of probes passed
    Degraded,
    /// Fewer than 50% of probes passed
    Unhealthy,
    /// No probes are registered
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A boolean health probe
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run the probe; `true` means healthy
    async fn probe(&self) -> bool;
}

/// Adapter turning an async closure into a [`HealthProbe`]
pub struct FnProbe<F> {
    f: F,
}

impl<F> FnProbe<F> {
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn probe(&self) -> bool {
        (self.f)().await
    }
}

/// A registered health check: a named probe plus its deadline and
/// stability thresholds
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    failure_threshold: u32,
    recovery_threshold: u32,
}

impl HealthCheck {
    /// Create a check with default deadline (5s) and thresholds (3 failures
    /// to flag, 2 successes to clear)
    pub fn new(name: impl Into<String>, probe: impl HealthProbe + 'static) -> Self {
        Self {
            name: name.into(),
            probe: Arc::new(probe),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }

    /// Create a check from an async closure
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send,
    {
        Self::new(name, FnProbe::new(f))
    }

    /// Set the per-run deadline for this probe
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many consecutive failures flag the check as not passing
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how many consecutive successes clear a flagged check
    pub fn recovery_threshold(mut self, threshold: u32) -> Self {
        self.recovery_threshold = threshold;
        self
    }

    /// The check's unique name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_threshold", &self.recovery_threshold)
            .finish_non_exhaustive()
    }
}

/// Running counters for one check
///
/// `passing` is the hysteresis-smoothed view: it flips to `false` only after
/// `failure_threshold` consecutive failures and back to `true` only after
/// `recovery_threshold` consecutive successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckState {
    /// Consecutive failed runs
    pub consecutive_failures: u32,
    /// Consecutive successful runs
    pub consecutive_successes: u32,
    /// Smoothed pass/fail view of the check
    pub passing: bool,
}

impl Default for CheckState {
    fn default() -> Self {
        Self { consecutive_failures: 0, consecutive_successes: 0, passing: true }
    }
}

/// Outcome of one aggregation run
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall classification for this run
    pub status: HealthStatus,
    /// Probes that passed in this run
    pub passed: usize,
    /// Probes executed in this run
    pub total: usize,
    /// Per-check pass/fail for this run
    pub results: HashMap<String, bool>,
    /// When the run finished
    pub checked_at: DateTime<Utc>,
}

/// One bounded-history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// When the run finished
    pub at: DateTime<Utc>,
    /// What the entry describes; currently always `"overall"`
    pub scope: String,
    /// Classification recorded for the run
    pub status: HealthStatus,
}

#[derive(Debug)]
struct Registry {
    checks: Vec<HealthCheck>,
    states: HashMap<String, CheckState>,
}

/// The health aggregator
#[derive(Debug)]
pub struct HealthAggregator {
    registry: Mutex<Registry>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthAggregator {
    /// Create an aggregator with no registered checks
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry { checks: Vec::new(), states: HashMap::new() }),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Register a check, replacing any existing check with the same name
    ///
    /// Replacement resets the check's counters. Registration while a run is
    /// in flight takes effect from the next run.
    pub fn add_check(&self, check: HealthCheck) {
        let mut registry = self.lock_registry();
        let name = check.name.clone();
        registry.states.insert(name.clone(), CheckState::default());
        if let Some(existing) = registry.checks.iter_mut().find(|c| c.name == name) {
            *existing = check;
        } else {
            registry.checks.push(check);
        }
    }

    /// Remove a check and its counters
    pub fn remove_check(&self, name: &str) -> bool {
        let mut registry = self.lock_registry();
        let before = registry.checks.len();
        registry.checks.retain(|c| c.name != name);
        registry.states.remove(name);
        registry.checks.len() != before
    }

    /// Names of all registered checks
    pub fn check_names(&self) -> Vec<String> {
        self.lock_registry().checks.iter().map(|c| c.name.clone()).collect()
    }

    /// Snapshot the per-check counters
    pub fn check_states(&self) -> HashMap<String, CheckState> {
        self.lock_registry().states.clone()
    }

    /// Snapshot the bounded run history
    pub fn history(&self) -> Vec<HistoryEntry> {
        match self.history.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run all probes and return the overall classification
    pub async fn check_health(&self) -> HealthStatus {
        self.run_checks().await.status
    }

    /// Run all probes and return the full report
    ///
    /// Probes run concurrently, each under its own deadline and isolated on
    /// its own task so a panicking probe just reads as a failure. Counters
    /// and history update after every run.
    #[instrument(skip(self))]
    pub async fn run_checks(&self) -> HealthReport {
        let checks: Vec<HealthCheck> = self.lock_registry().checks.clone();

        let probes = checks.iter().map(|check| {
            let name = check.name.clone();
            let probe = Arc::clone(&check.probe);
            let timeout = check.timeout;
            async move {
                let handle = tokio::spawn(async move { probe.probe().await });
                let passed = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(passed)) => passed,
                    Ok(Err(join_error)) => {
                        warn!("Health probe '{}' panicked: {}", name, join_error);
                        false
                    }
                    Err(_) => {
                        warn!("Health probe '{}' timed out after {:?}", name, timeout);
                        false
                    }
                };
                (name, passed)
            }
        });
        let outcomes: Vec<(String, bool)> = join_all(probes).await;

        self.update_counters(&checks, &outcomes);

        let total = outcomes.len();
        let passed = outcomes.iter().filter(|(_, ok)| *ok).count();
        let status = classify(passed, total);
        debug!("Health run: {}/{} probes passed, status {}", passed, total, status);

        self.record_overall(status);

        HealthReport {
            status,
            passed,
            total,
            results: outcomes.into_iter().collect(),
            checked_at: Utc::now(),
        }
    }

    fn update_counters(&self, checks: &[HealthCheck], outcomes: &[(String, bool)]) {
        let mut registry = self.lock_registry();
        for (name, passed) in outcomes {
            let Some(check) = checks.iter().find(|c| &c.name == name) else {
                continue;
            };
            // A check removed mid-flight no longer gets counted.
            if !registry.checks.iter().any(|c| &c.name == name) {
                continue;
            }

            let state = registry.states.entry(name.clone()).or_default();
            if *passed {
                state.consecutive_failures = 0;
                state.consecutive_successes += 1;
                if state.consecutive_successes >= check.recovery_threshold {
                    state.passing = true;
                }
            } else {
                state.consecutive_failures += 1;
                state.consecutive_successes = 0;
                if state.consecutive_failures >= check.failure_threshold {
                    state.passing = false;
                }
            }
        }
    }

    fn record_overall(&self, status: HealthStatus) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Health history lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        history.push(HistoryEntry { at: Utc::now(), scope: "overall".to_string(), status });
        if history.len() > HISTORY_MAX {
            let excess = history.len() - HISTORY_KEEP;
            history.drain(..excess);
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Health registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Classify a run from the fraction of probes that passed
fn classify(passed: usize, total: usize) -> HealthStatus {
    if total == 0 {
        return HealthStatus::Unknown;
    }
    let ratio = passed as f64 / total as f64;
    if ratio >= HEALTHY_RATIO {
        HealthStatus::Healthy
    } else if ratio >= DEGRADED_RATIO {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}
