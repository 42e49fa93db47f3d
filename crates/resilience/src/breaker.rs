//! Circuit breaker for fail-fast protection of flaky targets
//!
//! The breaker trips to open after a run of consecutive matching failures and
//! rejects calls outright until a recovery window has passed. It then admits
//! trial calls in half-open state and closes again once enough of them
//! succeed. State transitions are serialized behind one mutex so concurrent
//! callers observe a consistent state machine; cumulative counters live in
//! atomics beside it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    /// Normal operation, calls pass through
    Closed,
    /// Failing fast, calls are rejected
    Open,
    /// Probing recovery with trial calls
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive matching failures that trip the breaker open
    pub failure_threshold: u32,
    /// Trial successes in half-open state required to close again
    pub success_threshold: u32,
    /// How long the breaker stays open before admitting trial calls
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be at least 1"));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid("recovery_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for [`BreakerConfig`] with a fluent API
#[derive(Debug)]
pub struct BreakerConfigBuilder {
    config: BreakerConfig,
}

impl Default for BreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: BreakerConfig::default() }
    }

    /// Set the consecutive-failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the trial-success threshold
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set the recovery window
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Attach a clock and continue building a breaker that uses it
    pub fn clock<C: Clock>(self, clock: C) -> BreakerBuilder<C> {
        BreakerBuilder { config: self.config, clock }
    }

    /// Validate and produce the configuration
    pub fn build(self) -> ConfigResult<BreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder stage that carries a custom clock
#[derive(Debug)]
pub struct BreakerBuilder<C: Clock> {
    config: BreakerConfig,
    clock: C,
}

impl<C: Clock> BreakerBuilder<C> {
    /// Validate the configuration and build the breaker
    pub fn build(self) -> ConfigResult<Breaker<C>> {
        self.config.validate()?;
        Ok(Breaker::with_clock(self.config, self.clock))
    }
}

/// Point-in-time breaker metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerMetrics {
    /// Current state
    pub state: BreakerState,
    /// Consecutive matching failures seen since the last reset
    pub failure_count: u32,
    /// Trial successes seen in the current half-open episode
    pub success_count: u32,
    /// Calls admitted through the breaker
    pub total_calls: u64,
    /// Matching failures recorded over the breaker's lifetime
    pub total_failures: u64,
    /// Calls rejected while open
    pub total_rejections: u64,
}

/// Mutable state guarded by the breaker's mutex
#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// The circuit breaker
///
/// Generic over [`Clock`] so the recovery window can be driven
/// deterministically in tests.
#[derive(Debug)]
pub struct Breaker<C: Clock = SystemClock> {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    clock: C,
}

impl Breaker {
    /// Create a breaker with the given configuration and the system clock
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Create a breaker with the default configuration
    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl<C: Clock> Breaker<C> {
    /// Create a breaker with a custom clock
    pub fn with_clock(config: BreakerConfig, clock: C) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            clock,
        }
    }

    /// The breaker's configuration
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state without side effects
    pub fn state(&self) -> BreakerState {
        self.lock_inner().state
    }

    /// Check admission, moving from open to half-open once the recovery
    /// window has passed
    ///
    /// Returns `false` while the breaker is open inside the window. A
    /// rejected check counts toward the rejection metric. This is the entry
    /// point for manual integration together with
    /// [`record_success`](Self::record_success) and
    /// [`record_failure`](Self::record_failure).
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock_inner();
        let admitted = match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let window_passed = inner.last_failure_at.is_some_and(|at| {
                    self.clock.now().duration_since(at) > self.config.recovery_timeout
                });
                if window_passed {
                    info!("Circuit breaker entering half-open state for trial calls");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                }
                window_passed
            }
        };
        drop(inner);

        if !admitted {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Execute an async operation through the breaker
    ///
    /// Every error counts as a failure. Use
    /// [`execute_filtered`](Self::execute_filtered) to count only a subset.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_filtered(operation, |_| true).await
    }

    /// Execute an async operation, counting only matching errors as failures
    ///
    /// Errors the predicate rejects propagate to the caller without touching
    /// breaker state, mirroring how an infrastructure fault should trip the
    /// breaker while a caller mistake should not.
    #[instrument(skip(self, operation, matches), fields(state = %self.state()))]
    pub async fn execute_filtered<F, Fut, T, E, M>(
        &self,
        operation: F,
        matches: M,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
        M: Fn(&E) -> bool,
    {
        if !self.can_execute() {
            return Err(ResilienceError::BreakerOpen);
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                if matches(&error) {
                    self.record_failure();
                }
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute a blocking operation through the breaker
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.call_filtered(operation, |_| true)
    }

    /// Execute a blocking operation, counting only matching errors as
    /// failures
    #[instrument(skip(self, operation, matches), fields(state = %self.state()))]
    pub fn call_filtered<F, T, E, M>(&self, operation: F, matches: M) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
        M: Fn(&E) -> bool,
    {
        if !self.can_execute() {
            return Err(ResilienceError::BreakerOpen);
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                if matches(&error) {
                    self.record_failure();
                }
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record a successful call
    ///
    /// In half-open state this counts toward the trial-success threshold; in
    /// closed state it clears the consecutive-failure count.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(
                        "Circuit breaker closing after {} trial successes",
                        inner.success_count
                    );
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                }
            }
            _ => {
                inner.failure_count = 0;
            }
        }
    }

    /// Record a matching failure
    ///
    /// Stamps the failure time that anchors the recovery window. Reaching the
    /// failure threshold trips the breaker open; a failure in half-open state
    /// reopens it because the count from the original trip is retained.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock_inner();
        inner.failure_count += 1;
        inner.last_failure_at = Some(self.clock.now());

        if inner.failure_count >= self.config.failure_threshold {
            if inner.state != BreakerState::Open {
                warn!(
                    "Circuit breaker opening after {} consecutive failures",
                    inner.failure_count
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    /// Force the breaker back to closed with cleared counts
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_at = None;
    }

    /// Snapshot the breaker's metrics
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock_inner();
        BreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Circuit breaker state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the breaker state machine, recovery window, and error
    //! filtering.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::clock::MockClock;

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct TestError {
        message: String,
        infrastructure: bool,
    }

    impl TestError {
        fn infra(msg: &str) -> Self {
            Self { message: msg.to_string(), infrastructure: true }
        }

        fn caller(msg: &str) -> Self {
            Self { message: msg.to_string(), infrastructure: false }
        }
    }

    fn test_breaker(clock: MockClock) -> Breaker<MockClock> {
        BreakerConfig::builder()
            .failure_threshold(3)
            .success_threshold(2)
            .recovery_timeout(Duration::from_secs(60))
            .clock(clock)
            .build()
            .unwrap()
    }

    async fn trip(breaker: &Breaker<MockClock>, failures: u32) {
        for _ in 0..failures {
            let result: ResilienceResult<(), _> =
                breaker.execute(|| async { Err(TestError::infra("target down")) }).await;
            assert!(result.is_err());
        }
    }

    /// Validates a fresh breaker starts closed with zeroed counts.
    ///
    /// Assertions:
    /// - Confirms the closed state and empty metrics.
    #[test]
    fn test_starts_closed() {
        let breaker = Breaker::with_defaults();
        assert_eq!(breaker.state(), BreakerState::Closed);

        let metrics = breaker.metrics();
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.total_rejections, 0);
    }

    /// Validates configuration validation rejects degenerate thresholds.
    ///
    /// Assertions:
    /// - Confirms zero thresholds and a zero recovery window fail to build.
    /// - Confirms the defaults build cleanly.
    #[test]
    fn test_config_validation() {
        assert!(BreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(BreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(BreakerConfig::builder().recovery_timeout(Duration::ZERO).build().is_err());
        assert!(BreakerConfig::builder().build().is_ok());
    }

    /// Validates the breaker opens after the failure threshold and rejects
    /// subsequent calls without invoking the operation.
    ///
    /// Assertions:
    /// - Confirms the open state after 3 failures with threshold 3.
    /// - Confirms the next call returns `BreakerOpen` and never runs.
    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects() {
        let breaker = test_breaker(MockClock::new());
        trip(&breaker, 3).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = Arc::clone(&invoked);
        let result: ResilienceResult<(), TestError> = breaker
            .execute(|| {
                let invoked = Arc::clone(&invoked_clone);
                async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::BreakerOpen)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    /// Validates the recovery window is strict: admission resumes only once
    /// more than the window has elapsed.
    ///
    /// Assertions:
    /// - Confirms rejection at exactly the window boundary.
    /// - Confirms half-open admission just past the boundary.
    #[tokio::test]
    async fn test_half_open_after_recovery_window() {
        let clock = MockClock::new();
        let breaker = test_breaker(clock.clone());
        trip(&breaker, 3).await;

        clock.advance(Duration::from_secs(60));
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::Open);

        clock.advance(Duration::from_millis(1));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    /// Validates the breaker closes after enough trial successes and the
    /// failure count is cleared.
    ///
    /// Assertions:
    /// - Confirms one success keeps the breaker half-open.
    /// - Confirms the second success closes it with `failure_count` 0.
    #[tokio::test]
    async fn test_closes_after_trial_successes() {
        let clock = MockClock::new();
        let breaker = test_breaker(clock.clone());
        trip(&breaker, 3).await;
        clock.advance(Duration::from_secs(61));

        let first: ResilienceResult<_, TestError> =
            breaker.execute(|| async { Ok("probe") }).await;
        assert!(first.is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let second: ResilienceResult<_, TestError> =
            breaker.execute(|| async { Ok("probe") }).await;
        assert!(second.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);
    }

    /// Validates a failure during half-open reopens the breaker.
    ///
    /// Assertions:
    /// - Confirms the open state after a failed trial call.
    #[tokio::test]
    async fn test_failure_in_half_open_reopens() {
        let clock = MockClock::new();
        let breaker = test_breaker(clock.clone());
        trip(&breaker, 3).await;
        clock.advance(Duration::from_secs(61));
        assert!(breaker.can_execute());

        let result: ResilienceResult<(), _> =
            breaker.execute(|| async { Err(TestError::infra("still down")) }).await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    /// Validates a success in closed state clears the consecutive-failure
    /// count.
    ///
    /// Assertions:
    /// - Confirms 2 failures, a success, then 2 more failures leave the
    ///   breaker closed with threshold 3.
    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = test_breaker(MockClock::new());

        trip(&breaker, 2).await;
        let ok: ResilienceResult<_, TestError> = breaker.execute(|| async { Ok(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(breaker.metrics().failure_count, 0);

        trip(&breaker, 2).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    /// Validates non-matching errors propagate without touching breaker
    /// state.
    ///
    /// Assertions:
    /// - Confirms repeated caller errors leave the breaker closed with a
    ///   zero failure count.
    /// - Confirms the error itself still reaches the caller.
    #[tokio::test]
    async fn test_filtered_errors_skip_state() {
        let breaker = test_breaker(MockClock::new());

        for _ in 0..5 {
            let result: ResilienceResult<(), _> = breaker
                .execute_filtered(
                    || async { Err(TestError::caller("bad bundle id")) },
                    |e: &TestError| e.infrastructure,
                )
                .await;
            assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
        }

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);
        assert_eq!(breaker.metrics().total_failures, 0);
    }

    /// Validates the blocking twin drives the same state machine.
    ///
    /// Assertions:
    /// - Confirms 3 sync failures open the breaker.
    /// - Confirms a subsequent sync call is rejected.
    #[test]
    fn test_call_sync_twin() {
        let breaker = test_breaker(MockClock::new());

        for _ in 0..3 {
            let result: ResilienceResult<(), _> =
                breaker.call(|| Err(TestError::infra("unreachable")));
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let rejected: ResilienceResult<(), TestError> = breaker.call(|| Ok(()));
        assert!(matches!(rejected, Err(ResilienceError::BreakerOpen)));
    }

    /// Validates lifetime counters accumulate across calls.
    ///
    /// Assertions:
    /// - Confirms admitted calls, failures, and rejections are all counted.
    #[tokio::test]
    async fn test_metrics_counters() {
        let breaker = test_breaker(MockClock::new());

        let ok: ResilienceResult<_, TestError> = breaker.execute(|| async { Ok(()) }).await;
        assert!(ok.is_ok());
        trip(&breaker, 3).await;
        let rejected: ResilienceResult<(), TestError> = breaker.execute(|| async { Ok(()) }).await;
        assert!(rejected.is_err());

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.total_failures, 3);
        assert_eq!(metrics.total_rejections, 1);
    }

    /// Validates `reset` returns an open breaker to closed with cleared
    /// counts.
    ///
    /// Assertions:
    /// - Confirms the breaker admits calls again immediately after reset.
    #[tokio::test]
    async fn test_reset() {
        let breaker = test_breaker(MockClock::new());
        trip(&breaker, 3).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);

        let result: ResilienceResult<_, TestError> = breaker.execute(|| async { Ok(1) }).await;
        assert_eq!(result.ok(), Some(1));
    }

    /// Validates the state renders for logging.
    ///
    /// Assertions:
    /// - Confirms the display strings for all three states.
    #[test]
    fn test_state_display() {
        assert_eq!(BreakerState::Closed.to_string(), "CLOSED");
        assert_eq!(BreakerState::Open.to_string(), "OPEN");
        assert_eq!(BreakerState::HalfOpen.to_string(), "HALF_OPEN");
    }
}
