//! Bounded record pool with background idle reclamation
//!
//! [`ResourcePool`] tracks a capped set of connection records keyed by opaque
//! ids. Records are shared rather than exclusively leased: `acquire` hands
//! back the id of any record still flagged active and only creates a new one
//! when none is available and capacity remains. A background sweeper evicts
//! records that have sat idle past the configured timeout, whether or not
//! they are flagged active, since leases are not tracked precisely. Callers
//! that need a record pinned must touch it via `release` often enough to keep
//! it warm.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, PoolError};

/// Configuration for pool capacity and reclamation cadence
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of records the pool will track
    pub max_connections: usize,
    /// Idle time after which a record is evicted
    pub idle_timeout: Duration,
    /// How often the background sweeper runs
    pub cleanup_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a configuration builder
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("max_connections must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::invalid("idle_timeout must be non-zero"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid("cleanup_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for [`PoolConfig`] with a fluent API
#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: PoolConfig::default() }
    }

    /// Set the record capacity
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the idle eviction threshold
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the sweeper cadence
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Attach a clock and continue building a pool that uses it
    pub fn clock<C: Clock>(self, clock: C) -> PoolBuilder<C> {
        PoolBuilder { config: self.config, clock }
    }

    /// Validate and produce the configuration
    pub fn build(self) -> ConfigResult<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder stage that carries a custom clock
#[derive(Debug)]
pub struct PoolBuilder<C: Clock> {
    config: PoolConfig,
    clock: C,
}

impl<C: Clock> PoolBuilder<C> {
    /// Validate the configuration and build the pool
    pub fn build(self) -> ConfigResult<ResourcePool<C>> {
        self.config.validate()?;
        Ok(ResourcePool::with_clock(self.config, self.clock))
    }
}

/// One tracked record
///
/// Snapshots of this are handed to callers; the pool keeps the live copy.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Opaque id callers pass back to `release`
    pub id: String,
    /// When the record was created
    pub created_at: Instant,
    /// Last time the record was acquired, released, or annotated
    pub last_used_at: Instant,
    /// Whether the record is available for reuse via `acquire`
    pub active: bool,
    /// Free-form annotations attached by callers
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    /// Records currently tracked
    pub total: usize,
    /// Records flagged active
    pub active: usize,
    /// Configured capacity
    pub max_connections: usize,
    /// `active / max_connections`
    pub utilization: f64,
}

#[derive(Debug)]
struct PoolInner {
    records: HashMap<String, ConnectionRecord>,
    closed: bool,
}

/// The record pool
///
/// Generic over [`Clock`] so idle eviction can be driven deterministically in
/// tests. The background sweeper only starts when the pool is constructed
/// inside a Tokio runtime; without one, eviction still works through
/// [`sweep_now`](Self::sweep_now).
#[derive(Debug)]
pub struct ResourcePool<C: Clock = SystemClock> {
    config: PoolConfig,
    inner: Arc<Mutex<PoolInner>>,
    shutdown: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<C>,
}

impl ResourcePool {
    /// Create a pool with the given configuration and the system clock
    pub fn new(config: PoolConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Create a pool with the default configuration
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<C: Clock> ResourcePool<C> {
    /// Create a pool with a custom clock
    pub fn with_clock(config: PoolConfig, clock: C) -> Self {
        let inner = Arc::new(Mutex::new(PoolInner { records: HashMap::new(), closed: false }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let clock = Arc::new(clock);
        let sweeper = spawn_sweeper(&config, Arc::clone(&inner), Arc::clone(&shutdown), Arc::clone(&clock));

        Self { config, inner, shutdown, sweeper: Mutex::new(sweeper), clock }
    }

    /// The pool's configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a record id, reusing an active record when one exists
    ///
    /// Creates a record only when no active record is available and the pool
    /// is under capacity. Fails with [`PoolError::Exhausted`] at capacity and
    /// [`PoolError::Closed`] after [`close`](Self::close).
    #[instrument(skip(self))]
    pub fn acquire(&self) -> Result<String, PoolError> {
        let mut inner = lock_pool(&self.inner);
        if inner.closed {
            return Err(PoolError::Closed);
        }

        let now = self.clock.now();

        if let Some(record) = inner.records.values_mut().find(|r| r.active) {
            record.last_used_at = now;
            debug!("Reusing pool record {}", record.id);
            return Ok(record.id.clone());
        }

        if inner.records.len() >= self.config.max_connections {
            warn!("Resource pool exhausted at {} records", self.config.max_connections);
            return Err(PoolError::Exhausted { capacity: self.config.max_connections });
        }

        let id = Uuid::new_v4().to_string();
        let record = ConnectionRecord {
            id: id.clone(),
            created_at: now,
            last_used_at: now,
            active: true,
            metadata: HashMap::new(),
        };
        inner.records.insert(id.clone(), record);
        debug!("Created pool record {}", id);
        Ok(id)
    }

    /// Mark a record as used, refreshing its idle clock
    ///
    /// Returns `false` when the id is unknown (already evicted or never
    /// issued).
    pub fn release(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut inner = lock_pool(&self.inner);
        match inner.records.get_mut(id) {
            Some(record) => {
                record.last_used_at = now;
                true
            }
            None => {
                debug!("Release of unknown pool record {}", id);
                false
            }
        }
    }

    /// Flag a record as no longer reusable
    ///
    /// The record stays tracked (and counted against capacity) until the
    /// sweeper evicts it.
    pub fn deactivate(&self, id: &str) -> bool {
        let mut inner = lock_pool(&self.inner);
        match inner.records.get_mut(id) {
            Some(record) => {
                record.active = false;
                true
            }
            None => false,
        }
    }

    /// Attach an annotation to a record, refreshing its idle clock
    pub fn annotate(&self, id: &str, key: impl Into<String>, value: serde_json::Value) -> bool {
        let now = self.clock.now();
        let mut inner = lock_pool(&self.inner);
        match inner.records.get_mut(id) {
            Some(record) => {
                record.metadata.insert(key.into(), value);
                record.last_used_at = now;
                true
            }
            None => false,
        }
    }

    /// Snapshot one record by id
    pub fn record(&self, id: &str) -> Option<ConnectionRecord> {
        lock_pool(&self.inner).records.get(id).cloned()
    }

    /// Run one eviction pass immediately
    ///
    /// Returns the number of records evicted. The background sweeper calls
    /// the same logic on its cadence.
    pub fn sweep_now(&self) -> usize {
        sweep_idle(&self.inner, self.config.idle_timeout, self.clock.now())
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> PoolStats {
        let inner = lock_pool(&self.inner);
        let active = inner.records.values().filter(|r| r.active).count();
        PoolStats {
            total: inner.records.len(),
            active,
            max_connections: self.config.max_connections,
            utilization: active as f64 / self.config.max_connections as f64,
        }
    }

    /// Stop the sweeper and discard all records
    ///
    /// Awaits the sweeper task before touching the records so nothing
    /// mutates the pool after this returns. Subsequent `acquire` calls fail
    /// with [`PoolError::Closed`]; calling `close` again is a no-op.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::Relaxed);

        let handle = {
            let mut guard = match self.sweeper.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };

        if let Some(handle) = handle {
            // The sweeper holds no lock across await points, so aborting at
            // the tick cannot leave the records in a torn state.
            handle.abort();
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn!("Pool sweeper ended abnormally: {}", error);
                }
            }
        }

        let mut inner = lock_pool(&self.inner);
        inner.closed = true;
        let discarded = inner.records.len();
        inner.records.clear();
        if discarded > 0 {
            info!("Discarded {} pool records on close", discarded);
        }
    }
}

impl<C: Clock> Drop for ResourcePool<C> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn spawn_sweeper<C: Clock>(
    config: &PoolConfig,
    inner: Arc<Mutex<PoolInner>>,
    shutdown: Arc<AtomicBool>,
    clock: Arc<C>,
) -> Option<JoinHandle<()>> {
    let period = config.cleanup_interval;
    let idle_timeout = config.idle_timeout;

    match Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let evicted = sweep_idle(&inner, idle_timeout, clock.now());
                if evicted > 0 {
                    debug!("Evicted {} idle pool records", evicted);
                }
            }
        })),
        Err(_) => {
            warn!("Skipping pool cleanup task: no active Tokio runtime");
            None
        }
    }
}

/// Evict records idle longer than the timeout, active or not
fn sweep_idle(inner: &Mutex<PoolInner>, idle_timeout: Duration, now: Instant) -> usize {
    let mut guard = lock_pool(inner);
    let before = guard.records.len();
    guard.records.retain(|_, record| now.duration_since(record.last_used_at) <= idle_timeout);
    before - guard.records.len()
}

fn lock_pool(inner: &Mutex<PoolInner>) -> std::sync::MutexGuard<'_, PoolInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Pool records lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
