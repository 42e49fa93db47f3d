//! Integration tests for guard composition
//!
//! Tests retry, timeout, and circuit breaker guards layered around one
//! operation the way call sites compose them in practice.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use convoy_resilience::{
    policies, Breaker, BreakerConfig, BreakerState, MockClock, ResilienceError, RetryConfig,
    RetryError, RetryExecutor, TimeoutGuard,
};

/// Custom error type for testing
#[derive(Debug, Clone)]
#[allow(dead_code)]
struct TestError {
    message: String,
    retryable: bool,
}

impl TestError {
    fn transient(message: &str) -> Self {
        Self { message: message.to_string(), retryable: true }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

/// Validates retry recovery from transient failures with a fixed backoff.
///
/// Two failures with a 100ms fixed delay must consume at least 200ms of
/// backoff before the third attempt succeeds, and the statistics must show
/// both retries.
///
/// # Test Steps
/// 1. Configure 2 retries with a 100ms fixed backoff and no jitter
/// 2. Simulate an operation failing twice, then succeeding
/// 3. Verify the success value and exactly 3 invocations
/// 4. Verify at least 200ms elapsed across the backoff sleeps
/// 5. Verify stats record 1 success, 2 failures, 2 retries
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_recovers_from_transient_failures() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let config = RetryConfig::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(100))
        .fixed_backoff()
        .jitter(false)
        .build()
        .expect("Failed to build config");
    let executor = RetryExecutor::new(config);

    let started = Instant::now();
    let result = executor
        .execute("reconnect", &policies::RetryAll, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::transient("Transient failure"))
                } else {
                    Ok("Success")
                }
            }
        })
        .await;

    assert_eq!(result.expect("Should succeed"), "Success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(200));

    let stats = executor.stats_for("reconnect").expect("Stats should exist");
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 2);
    assert_eq!(stats.retry_count, 2);
}

/// Validates exhausted retries surface the final error to the caller.
///
/// # Test Steps
/// 1. Configure 2 retries with a short fixed backoff
/// 2. Simulate an operation that always fails with a numbered message
/// 3. Verify exactly 3 invocations were made
/// 4. Verify the `Exhausted` error carries the attempt count and the last
///    failure's message
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exhaustion_preserves_last_error() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let config = RetryConfig::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(5))
        .fixed_backoff()
        .jitter(false)
        .build()
        .expect("Failed to build config");
    let executor = RetryExecutor::new(config);

    let result: Result<(), _> = executor
        .execute("doomed", &policies::RetryAll, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let n = count.fetch_add(1, Ordering::SeqCst);
                Err(TestError::transient(&format!("failure {n}")))
            }
        })
        .await;

    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    match result {
        Err(RetryError::Exhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert_eq!(source.message, "failure 2");
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

/// Validates the breaker trips after its threshold and rejects calls without
/// invoking the operation.
///
/// # Test Steps
/// 1. Configure a breaker with failure threshold 3
/// 2. Drive 3 consecutive failures through it
/// 3. Verify the breaker reads `Open`
/// 4. Make another call and verify it is rejected with `BreakerOpen`
/// 5. Verify the rejected call never invoked the operation
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_trips_and_rejects_without_invoking() {
    let breaker = Breaker::new(
        BreakerConfig::builder()
            .failure_threshold(3)
            .build()
            .expect("Failed to build config"),
    );

    for _ in 0..3 {
        let result: Result<(), _> =
            breaker.execute(|| async { Err(TestError::transient("target down")) }).await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    let invoked = Arc::new(AtomicU32::new(0));
    let invoked_clone = Arc::clone(&invoked);
    let rejected: Result<(), _> = breaker
        .execute(|| {
            let invoked = Arc::clone(&invoked_clone);
            async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                Err(TestError::transient("should not run"))
            }
        })
        .await;

    assert!(matches!(rejected, Err(ResilienceError::BreakerOpen)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

/// Validates the full breaker recovery cycle under a mock clock.
///
/// # Test Steps
/// 1. Trip a breaker with threshold 2 and a 30s recovery window
/// 2. Advance the mock clock past the window
/// 3. Verify the next call is admitted as a half-open trial
/// 4. Drive 2 trial successes and verify the breaker closes
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_recovery_cycle() {
    let clock = MockClock::new();
    let breaker = BreakerConfig::builder()
        .failure_threshold(2)
        .success_threshold(2)
        .recovery_timeout(Duration::from_secs(30))
        .clock(clock.clone())
        .build()
        .expect("Failed to build breaker");

    for _ in 0..2 {
        let result: Result<(), _> =
            breaker.execute(|| async { Err(TestError::transient("boot failure")) }).await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    clock.advance(Duration::from_secs(31));

    let first_trial = breaker.execute(|| async { Ok::<_, TestError>("alive") }).await;
    assert!(first_trial.is_ok());
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    let second_trial = breaker.execute(|| async { Ok::<_, TestError>("alive") }).await;
    assert!(second_trial.is_ok());
    assert_eq!(breaker.state(), BreakerState::Closed);
}

/// Validates a timeout guard composed inside a retry loop.
///
/// The first attempt times out; the retry policy treats the timeout as
/// retryable and the second attempt completes inside the deadline.
///
/// # Test Steps
/// 1. Build a retry executor that retries timeouts with a short backoff
/// 2. Guard an operation that sleeps past the deadline on its first attempt
/// 3. Verify the composed call ultimately succeeds
/// 4. Verify exactly 2 attempts ran and the guard recorded both durations
#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_inside_retry() {
    let guard = Arc::new(TimeoutGuard::with_defaults());
    let executor = RetryExecutor::new(
        RetryConfig::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(10))
            .fixed_backoff()
            .jitter(false)
            .build()
            .expect("Failed to build config"),
    );
    let policy = policies::RetryIf::new(|e: &ResilienceError<TestError>, _| e.is_timeout());

    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);
    let guard_clone = Arc::clone(&guard);

    let result = executor
        .execute("guarded-op", &policy, || {
            let guard = Arc::clone(&guard_clone);
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let slow = count.fetch_add(1, Ordering::SeqCst) == 0;
                guard
                    .run_with("probe", Duration::from_millis(50), async move {
                        if slow {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                        Ok::<_, TestError>("probed")
                    })
                    .await
            }
        })
        .await;

    assert_eq!(result.expect("Should succeed on retry"), "probed");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    assert_eq!(guard.stats_for("probe").expect("Stats should exist").count, 2);
}

/// Validates a breaker wrapped around a retry executor.
///
/// Each breaker call runs a full retry cycle; only exhausted cycles count as
/// breaker failures, and once open the breaker stops further retry cycles
/// from running at all.
///
/// # Test Steps
/// 1. Wrap a 1-retry executor in a breaker with failure threshold 3
/// 2. Drive 3 exhausted retry cycles (2 invocations each)
/// 3. Verify the breaker is open after 6 underlying invocations
/// 4. Verify the next breaker call is rejected with no new invocations
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_wrapping_retry() {
    let executor = RetryExecutor::new(
        RetryConfig::builder()
            .max_retries(1)
            .base_delay(Duration::from_millis(5))
            .fixed_backoff()
            .jitter(false)
            .build()
            .expect("Failed to build config"),
    );
    let breaker = Breaker::new(
        BreakerConfig::builder()
            .failure_threshold(3)
            .build()
            .expect("Failed to build config"),
    );

    let attempt_count = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let executor = executor.clone();
        let count = Arc::clone(&attempt_count);
        let result: Result<(), _> = breaker
            .execute(|| async move {
                executor
                    .execute("flaky", &policies::RetryAll, || {
                        let count = Arc::clone(&count);
                        async move {
                            count.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(TestError::transient("still failing"))
                        }
                    })
                    .await
            })
            .await;
        assert!(result.is_err());
    }

    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 6);

    let executor_for_rejected = executor.clone();
    let count = Arc::clone(&attempt_count);
    let rejected: Result<(), _> = breaker
        .execute(|| async move {
            executor_for_rejected
                .execute("flaky", &policies::RetryAll, || {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(TestError::transient("still failing"))
                    }
                })
                .await
        })
        .await;

    assert!(matches!(rejected, Err(ResilienceError::BreakerOpen)));
    assert_eq!(attempt_count.load(Ordering::SeqCst), 6);
}

/// Validates shared retry statistics stay consistent under concurrent use.
///
/// # Test Steps
/// 1. Clone one retry executor across 10 spawned tasks
/// 2. Run one successful operation per task under the same name
/// 3. Verify the shared counter reads exactly 10 successes
#[tokio::test(flavor = "multi_thread")]
async fn test_shared_stats_under_concurrency() {
    let executor = RetryExecutor::with_defaults();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let result: Result<(), RetryError<TestError>> =
                executor.execute("parallel-op", &policies::RetryAll, || async { Ok(()) }).await;
            assert!(result.is_ok());
        }));
    }
    for handle in handles {
        handle.await.expect("Task should not panic");
    }

    let stats = executor.stats_for("parallel-op").expect("Stats should exist");
    assert_eq!(stats.success_count, 10);
    assert_eq!(stats.failure_count, 0);
}
