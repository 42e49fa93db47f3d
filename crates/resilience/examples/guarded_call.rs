//! Example: Guarding a flaky operation with retry, timeout, and breaker
//!
//! Simulates a remote target that misbehaves in different ways and shows how
//! each guard responds. Every guard is a plain value constructed here; they
//! compose by nesting calls, not through globals.
//!
//! Run this example: ```bash cargo run --example guarded_call```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use convoy_resilience::{
    policies, Breaker, BreakerConfig, BreakerState, HealthAggregator, HealthCheck, PoolConfig,
    ResilienceError, ResilienceResult, ResourcePool, RetryConfig, RetryExecutor, TimeoutGuard,
};

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct ProbeError {
    message: String,
}

impl ProbeError {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Resilience Guard Walkthrough");
    println!("============================\n");

    // Example 1: Retry a flaky probe with fixed backoff
    println!("1. Retrying a probe that fails twice before recovering");

    let config = RetryConfig::builder()
        .max_retries(3)
        .base_delay(Duration::from_millis(50))
        .fixed_backoff()
        .jitter(false)
        .build()?;
    let retry = RetryExecutor::new(config);

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);
    let value = retry
        .execute("device-probe", &policies::RetryAll, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProbeError::new("Device is still booting"))
                } else {
                    Ok("device-online")
                }
            }
        })
        .await?;

    println!("   ✓ Recovered with value: {value}");
    if let Some(stats) = retry.stats_for("device-probe") {
        println!(
            "   Stats: {} success, {} failures, {} retries\n",
            stats.success_count, stats.failure_count, stats.retry_count
        );
    }

    // Example 2: Bound a slow operation and learn from observed durations
    println!("2. Enforcing a 100ms limit on an operation that needs 300ms");

    let guard = TimeoutGuard::new(Duration::from_secs(30));
    let slow: ResilienceResult<&str, ProbeError> = guard
        .run_with("screenshot", Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("never returned")
        })
        .await;
    match slow {
        Err(ResilienceError::Timeout { limit }) => {
            println!("   ✓ Timed out as expected after {limit:?}");
        }
        other => println!("   ✗ Unexpected outcome: {other:?}"),
    }

    for _ in 0..3 {
        let _quick: ResilienceResult<&str, ProbeError> = guard
            .run_with("screenshot", Duration::from_millis(100), async { Ok("png-bytes") })
            .await;
    }
    println!("   Suggested timeout from history: {:?}\n", guard.suggested_timeout("screenshot"));

    // Example 3: Trip a breaker and watch it reject while open
    println!("3. Tripping a breaker with two consecutive failures");

    let breaker = Breaker::new(
        BreakerConfig::builder()
            .failure_threshold(2)
            .success_threshold(1)
            .recovery_timeout(Duration::from_secs(60))
            .build()?,
    );

    for attempt in 1..=2 {
        let failed: ResilienceResult<(), ProbeError> =
            breaker.call(|| Err(ProbeError::new("Connection refused")));
        println!("   call {attempt}: failed = {}", failed.is_err());
    }
    println!("   State: {}", breaker.state());
    assert_eq!(breaker.state(), BreakerState::Open);

    let rejected: ResilienceResult<(), ProbeError> = breaker.call(|| Ok(()));
    match rejected {
        Err(ResilienceError::BreakerOpen) => println!("   ✓ Rejected without invoking"),
        other => println!("   ✗ Unexpected outcome: {other:?}"),
    }
    let metrics = breaker.metrics();
    println!(
        "   Metrics: {} calls, {} failures, {} rejections\n",
        metrics.total_calls, metrics.total_failures, metrics.total_rejections
    );

    // Example 4: Aggregate health across named probes
    println!("4. Classifying overall health from two probes");

    let aggregator = HealthAggregator::new();
    aggregator.add_check(HealthCheck::from_fn("daemon", || async { true }));
    aggregator.add_check(HealthCheck::from_fn("network", || async { false }));

    let report = aggregator.run_checks().await;
    println!("   Status: {} ({}/{} passing)", report.status, report.passed, report.total);
    for (name, passed) in &report.results {
        println!("   - {name}: {}", if *passed { "ok" } else { "failing" });
    }
    println!();

    // Example 5: Track a shared record in the resource pool
    println!("5. Acquiring from a pool with shared-record reuse");

    let pool = ResourcePool::new(PoolConfig::builder().max_connections(3).build()?);
    let first = pool.acquire()?;
    let second = pool.acquire()?;
    println!("   Shared record reused: {}", first == second);

    pool.annotate(&first, "device", serde_json::json!("emulator-5554"));
    let stats = pool.stats();
    println!(
        "   Pool stats: {}/{} records, utilization {:.2}",
        stats.total, stats.max_connections, stats.utilization
    );

    pool.close().await;
    println!("   ✓ Pool closed\n");

    println!("Done.");
    Ok(())
}
