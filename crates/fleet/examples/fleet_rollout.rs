//! Example: Rolling an install out across a fleet of simulated devices
//!
//! Fans one operation out over several target keys with bounded concurrency,
//! wraps the per-device work in a retry guard, then writes a JSON report and
//! prints per-device history from the tracker.
//!
//! Run this example: ```bash cargo run --example fleet_rollout```

use std::time::Duration;

use anyhow::Result;
use convoy_fleet::{BatchConfig, BatchExecutor, DetailedReport, TargetTracker};
use convoy_resilience::{policies, RetryConfig, RetryExecutor};

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct InstallError {
    message: String,
}

impl InstallError {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Fleet Rollout Walkthrough");
    println!("=========================\n");

    // Example 1: Fan an install out with 3 workers and a retry guard inside
    println!("1. Installing across 6 devices, 3 at a time, one retry each");

    let retry_config = RetryConfig::builder()
        .max_retries(1)
        .base_delay(Duration::from_millis(25))
        .fixed_backoff()
        .jitter(false)
        .build()?;

    let batch_config = BatchConfig::builder()
        .max_workers(3)
        .timeout(Duration::from_secs(10))
        .build()?;
    let executor = BatchExecutor::new(batch_config);

    let devices: Vec<String> = (0..6).map(|i| format!("emulator-{}", 5554 + i * 2)).collect();
    let results = executor
        .run_batch("install", devices, move |key| {
            let retry = RetryExecutor::new(retry_config.clone());
            async move {
                retry
                    .execute("install", &policies::RetryAll, || {
                        let key = key.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            // One stubborn device refuses the install outright.
                            if key == "emulator-5558" {
                                Err(InstallError::new("INSTALL_FAILED_INSUFFICIENT_STORAGE"))
                            } else {
                                Ok(format!("{key}: installed"))
                            }
                        }
                    })
                    .await
            }
        })
        .await;

    for result in &results {
        match (&result.value, &result.error) {
            (Some(value), _) => println!("   ✓ {value}"),
            (_, Some(error)) => println!("   ✗ {}: {error}", result.key),
            _ => {}
        }
    }
    println!();

    // Example 2: Summarize the batch and write a JSON report
    println!("2. Writing the batch report");

    let report = DetailedReport::new("install", results);
    println!("   {}", report.summary);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("install-report.json");
    report.write_json(&path)?;
    println!("   ✓ Report written to {}\n", path.display());

    // Example 3: Accumulate per-device history across batches
    println!("3. Tracking per-device outcomes");

    let tracker = TargetTracker::new();
    for result in &report.results {
        tracker.record_result("install", result);
    }
    for (key, stats) in tracker.all_stats() {
        println!(
            "   {key}: {} ops, {:.0}% success, avg {:.3}s",
            stats.total_operations,
            stats.success_rate * 100.0,
            stats.avg_duration_secs
        );
    }

    println!("\nDone.");
    Ok(())
}
