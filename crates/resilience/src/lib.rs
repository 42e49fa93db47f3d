//! Resilience primitives for operations against flaky remote targets.
//!
//! Everything in this crate wraps caller-supplied operations; it never knows
//! what an operation does. The pieces compose explicitly at the call site:
//!
//! - [`retry`]: re-run an operation with configurable backoff and jitter
//! - [`timeout`]: bound an operation's wall-clock time and learn from
//!   observed durations
//! - [`breaker`]: fail fast after a run of failures, probe recovery with
//!   trial calls
//! - [`pool`]: a bounded record registry with background idle reclamation
//! - [`health`]: aggregate boolean probes into an overall classification
//! - [`validate`]: reject malformed target identifiers before dispatch
//!
//! Each guard is an explicit instance constructed by the application and
//! passed by reference; there is no process-wide shared state. Async entry
//! points are the primary API, with blocking twins where call sites cannot
//! await.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod breaker;
pub mod clock;
pub mod error;
pub mod health;
pub mod pool;
pub mod retry;
pub mod timeout;
pub mod validate;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use breaker::{
    Breaker, BreakerBuilder, BreakerConfig, BreakerConfigBuilder, BreakerMetrics, BreakerState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ConfigError, ConfigResult, PoolError, ResilienceError, ResilienceResult};
pub use health::{
    CheckState, FnProbe, HealthAggregator, HealthCheck, HealthProbe, HealthReport, HealthStatus,
    HistoryEntry,
};
pub use pool::{
    ConnectionRecord, PoolBuilder, PoolConfig, PoolConfigBuilder, PoolStats, ResourcePool,
};
pub use retry::{
    policies, retry_with_policy, BackoffStrategy, RetryConfig, RetryConfigBuilder, RetryError,
    RetryExecutor, RetryPolicy, RetryResult, RetryStats,
};
pub use timeout::{TimeoutGuard, TimeoutStats, DEFAULT_TIMEOUT};
pub use validate::{
    validate_bundle_id, validate_port, validate_target_id, validate_timeout, ValidationError,
    ValidationResult,
};
