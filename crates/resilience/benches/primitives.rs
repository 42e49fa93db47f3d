//! Benchmarks for the synchronous hot paths: backoff arithmetic, jitter,
//! and breaker admission.
//!
//! Async execution paths are dominated by the wrapped operations themselves,
//! so only the bookkeeping that runs on every call is measured here.

use std::time::Duration;

use convoy_resilience::{BackoffStrategy, Breaker, BreakerConfig, RetryConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_backoff_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_delay");
    let base = Duration::from_millis(100);
    let max = Duration::from_secs(60);

    group.bench_function("fixed", |b| {
        b.iter(|| BackoffStrategy::Fixed.delay_for(black_box(7), base, max));
    });

    group.bench_function("exponential", |b| {
        let strategy = BackoffStrategy::Exponential { factor: 2.0 };
        b.iter(|| strategy.delay_for(black_box(7), base, max));
    });

    group.bench_function("linear", |b| {
        b.iter(|| BackoffStrategy::Linear.delay_for(black_box(7), base, max));
    });

    group.finish();
}

fn bench_jittered_delay(c: &mut Criterion) {
    let config = RetryConfig::builder()
        .fixed_backoff()
        .jitter(true)
        .build()
        .expect("valid config");

    c.bench_function("delay_with_jitter", |b| {
        b.iter(|| config.delay_before_next(black_box(3)));
    });
}

fn bench_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("breaker");

    group.bench_function("admit_closed", |b| {
        let breaker = Breaker::with_defaults();
        b.iter(|| breaker.can_execute());
    });

    group.bench_function("call_closed", |b| {
        let breaker = Breaker::with_defaults();
        b.iter(|| breaker.call(|| Ok::<_, std::io::Error>(black_box(1))));
    });

    group.bench_function("record_cycle", |b| {
        let breaker = Breaker::new(
            BreakerConfig::builder()
                .failure_threshold(u32::MAX)
                .build()
                .expect("valid config"),
        );
        b.iter(|| {
            breaker.record_failure();
            breaker.record_success();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_backoff_delay, bench_jittered_delay, bench_breaker);
criterion_main!(benches);
