//! Retry execution with configurable backoff and per-operation statistics
//!
//! Operations against remote targets fail transiently all the time, so every
//! call path that talks to one goes through a [`RetryExecutor`]. The executor
//! re-runs a caller-supplied closure up to a configured budget, sleeping
//! between attempts according to a backoff strategy (with optional jitter to
//! avoid synchronized retry storms across many targets), and keeps
//! per-operation-name success/failure/retry counters that can be snapshotted
//! for reporting.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::{ConfigError, ConfigResult};

/// Errors that can occur during retry execution
///
/// Both variants carry the last error observed from the operation, so the
/// caller never loses the underlying failure.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; `source` is the error from the final attempt
    #[error("All {attempts} attempts failed, last error: {source}")]
    Exhausted {
        /// Number of attempts actually made (retries + 1)
        attempts: u32,
        /// Error from the last attempt
        source: E,
    },

    /// The operation failed with an error the policy refuses to retry
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable {
        /// The error that stopped the retry loop
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Recover the underlying operation error
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait deciding whether an error is worth another attempt
///
/// This is the seam for error-type filtering: only errors the policy accepts
/// consume retry budget, everything else propagates immediately.
pub trait RetryPolicy<E> {
    /// Return `true` if the error should be retried at the given attempt
    /// index (0-based)
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// Backoff strategy for calculating the delay before the next attempt
///
/// All strategies derive their delay from the configured base delay and are
/// clamped to the configured maximum.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Constant delay: `base`
    Fixed,
    /// Exponential growth: `base * factor^attempt`
    Exponential {
        /// Multiplier applied per attempt; must be at least 1.0
        factor: f64,
    },
    /// Linear growth: `base * (attempt + 1)`
    Linear,
    /// Caller-supplied function of `(attempt, base)`
    Custom(fn(u32, Duration) -> Duration),
}

impl BackoffStrategy {
    /// Calculate the pre-jitter delay before attempt `attempt + 1`
    ///
    /// `attempt` is the 0-based index of the attempt that just failed. The
    /// result is clamped to `max`.
    pub fn delay_for(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let raw = match self {
            Self::Fixed => base,
            Self::Exponential { factor } => {
                let secs = base.as_secs_f64() * factor.powi(attempt as i32);
                // min() with the cap keeps the f64 finite before conversion
                Duration::from_secs_f64(secs.min(max.as_secs_f64()).max(0.0))
            }
            Self::Linear => base.saturating_mul(attempt.saturating_add(1)),
            Self::Custom(f) => f(attempt, base),
        };
        raw.min(max)
    }
}

/// Add random jitter in `[10%, 30%)` of the delay
///
/// Spreading out retries keeps a fleet of targets that failed together from
/// hammering the same backend in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let fraction = rand::thread_rng().gen_range(0.10..0.30);
    let extra = Duration::from_secs_f64(delay.as_secs_f64() * fraction);
    delay.saturating_add(extra)
}

/// Configuration for retry behavior
///
/// Immutable once built; consumed read-only by the executor.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (total attempts =
    /// `max_retries + 1`)
    pub max_retries: u32,
    /// Base delay all strategies derive from
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Strategy used to grow the delay across attempts
    pub strategy: BackoffStrategy,
    /// Whether to add random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential { factor: 2.0 },
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must be at least base_delay"));
        }

        if let BackoffStrategy::Exponential { factor } = self.strategy {
            if !factor.is_finite() || factor < 1.0 {
                return Err(ConfigError::invalid("exponential factor must be at least 1.0"));
            }
        }

        Ok(())
    }

    /// Compute the (possibly jittered) delay before the attempt following
    /// `attempt`
    pub fn delay_before_next(&self, attempt: u32) -> Duration {
        let delay = self.strategy.delay_for(attempt, self.base_delay, self.max_delay);
        if self.jitter { with_jitter(delay) } else { delay }
    }
}

/// Builder for [`RetryConfig`] with a fluent API
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Set the number of retries after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set the delay ceiling
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Use a constant delay between attempts
    pub fn fixed_backoff(mut self) -> Self {
        self.config.strategy = BackoffStrategy::Fixed;
        self
    }

    /// Use exponential backoff with the given growth factor
    pub fn exponential_backoff(mut self, factor: f64) -> Self {
        self.config.strategy = BackoffStrategy::Exponential { factor };
        self
    }

    /// Use linearly growing delays
    pub fn linear_backoff(mut self) -> Self {
        self.config.strategy = BackoffStrategy::Linear;
        self
    }

    /// Use a caller-supplied delay function of `(attempt, base_delay)`
    pub fn custom_backoff(mut self, f: fn(u32, Duration) -> Duration) -> Self {
        self.config.strategy = BackoffStrategy::Custom(f);
        self
    }

    /// Enable or disable jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-operation-name retry counters
///
/// Monotonically increasing until explicitly reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Operations that ultimately returned a value
    pub success_count: u64,
    /// Individual failed attempts
    pub failure_count: u64,
    /// Failed attempts that were followed by another attempt
    pub retry_count: u64,
}

/// The retry executor
///
/// Cheap to clone; clones share the same statistics map. Construct one per
/// subsystem and pass it around explicitly rather than reaching for shared
/// process-wide state.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    stats: Arc<Mutex<HashMap<String, RetryStats>>>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RetryExecutor {
    /// Create an executor with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config, stats: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Create an executor with the default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// The executor's configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with retry
    ///
    /// `name` keys the statistics for this operation. Attempts run
    /// sequentially; the loop sleeps between attempts per the configured
    /// backoff. Errors the policy rejects propagate immediately without
    /// consuming retry budget; otherwise the last observed error surfaces
    /// once the budget is spent.
    #[instrument(skip(self, policy, operation), fields(operation = name, max_retries = self.config.max_retries))]
    pub async fn execute<P, F, Fut, T, E>(
        &self,
        name: &str,
        policy: &P,
        mut operation: F,
    ) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;

        loop {
            debug!("Executing attempt {}/{}", attempt + 1, self.config.max_retries + 1);

            match operation().await {
                Ok(value) => {
                    self.bump(name, |s| s.success_count += 1);
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.bump(name, |s| s.failure_count += 1);

                    if !policy.should_retry(&error, attempt) {
                        debug!("Error is non-retryable: {}", error);
                        return Err(RetryError::NonRetryable { source: error });
                    }

                    if attempt >= self.config.max_retries {
                        warn!("All {} attempts failed: {}", attempt + 1, error);
                        return Err(RetryError::Exhausted { attempts: attempt + 1, source: error });
                    }

                    let delay = self.config.delay_before_next(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}; retrying in {:?}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    self.bump(name, |s| s.retry_count += 1);
                    attempt += 1;
                }
            }
        }
    }

    /// Execute a blocking operation with retry
    ///
    /// Synchronous twin of [`execute`](Self::execute) for non-async call
    /// sites; sleeps on the calling thread.
    #[instrument(skip(self, policy, operation), fields(operation = name, max_retries = self.config.max_retries))]
    pub fn execute_blocking<P, F, T, E>(
        &self,
        name: &str,
        policy: &P,
        mut operation: F,
    ) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation() {
                Ok(value) => {
                    self.bump(name, |s| s.success_count += 1);
                    return Ok(value);
                }
                Err(error) => {
                    self.bump(name, |s| s.failure_count += 1);

                    if !policy.should_retry(&error, attempt) {
                        return Err(RetryError::NonRetryable { source: error });
                    }

                    if attempt >= self.config.max_retries {
                        warn!("All {} attempts failed: {}", attempt + 1, error);
                        return Err(RetryError::Exhausted { attempts: attempt + 1, source: error });
                    }

                    let delay = self.config.delay_before_next(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}; retrying in {:?}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        error,
                        delay
                    );
                    std::thread::sleep(delay);
                    self.bump(name, |s| s.retry_count += 1);
                    attempt += 1;
                }
            }
        }
    }

    /// Snapshot all per-operation counters
    pub fn stats(&self) -> HashMap<String, RetryStats> {
        self.lock_stats().clone()
    }

    /// Snapshot the counters for one operation name
    pub fn stats_for(&self, name: &str) -> Option<RetryStats> {
        self.lock_stats().get(name).copied()
    }

    /// Reset all counters to zero
    pub fn reset_stats(&self) {
        self.lock_stats().clear();
    }

    fn bump(&self, name: &str, update: impl FnOnce(&mut RetryStats)) {
        let mut stats = self.lock_stats();
        update(stats.entry(name.to_string()).or_default());
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, HashMap<String, RetryStats>> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Retry stats lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Run one operation with retry without keeping an executor around
pub async fn retry_with_policy<P, F, Fut, T, E>(
    config: RetryConfig,
    policy: P,
    name: &str,
    operation: F,
) -> RetryResult<T, E>
where
    P: RetryPolicy<E>,
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryExecutor::new(config).execute(name, &policy, operation).await
}

/// Ready-made retry policies
pub mod policies {
    use super::RetryPolicy;

    /// Retry on any error (the default posture for flaky targets)
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RetryAll;

    impl<E> RetryPolicy<E> for RetryAll {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            true
        }
    }

    /// Never retry
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RetryNone;

    impl<E> RetryPolicy<E> for RetryNone {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            false
        }
    }

    /// Retry when a predicate over the error (and attempt index) holds
    #[derive(Debug, Clone)]
    pub struct RetryIf<F> {
        predicate: F,
    }

    impl<F> RetryIf<F> {
        /// Wrap a predicate function
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for RetryIf<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> bool {
            (self.predicate)(error, attempt)
        }
    }
}
