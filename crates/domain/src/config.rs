//! Serialisable application configuration
//!
//! Every section and field has a default, so a config file only needs the
//! values it changes:
//!
//! ```toml
//! [orchestrator]
//! max_concurrent_operations = 2
//!
//! [rate_limits.targets.booking-api]
//! capacity = 100
//! window_ms = 60000
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CLEANUP_TIMEOUT_MS, DEFAULT_DB_PATH, DEFAULT_DB_POOL_SIZE, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_CONCURRENT_OPERATIONS, DEFAULT_OPERATION_TIMEOUT_MS,
    DEFAULT_POOL_ACQUIRE_TIMEOUT_MS, DEFAULT_POOL_IDLE_TIMEOUT_MS, DEFAULT_POOL_MAX_RESOURCES,
    DEFAULT_RATE_LIMIT_CAPACITY, DEFAULT_RATE_LIMIT_WINDOW_MS, DEFAULT_RETRY_INITIAL_DELAY_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_RETRY_MULTIPLIER,
    DEFAULT_SHUTDOWN_GRACE_MS,
};
use crate::errors::{Result, TetherError};

/// Top-level configuration, one section per component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Admission and deadlines
    pub orchestrator: OrchestratorSettings,
    /// Session pool
    pub pool: PoolSettings,
    /// Token buckets
    pub rate_limits: RateLimitSettings,
    /// Retry policy
    pub retry: RetrySettings,
    /// Ledger storage
    pub database: DatabaseConfig,
    /// Tracing output
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, field: &str, msg: &str| -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(TetherError::Config(format!("{field}: {msg}")))
            }
        };

        let o = &self.orchestrator;
        check(
            o.max_concurrent_operations > 0,
            "orchestrator.max_concurrent_operations",
            "must be > 0",
        )?;
        check(o.operation_timeout_ms > 0, "orchestrator.operation_timeout_ms", "must be > 0")?;

        let p = &self.pool;
        check(p.max_resources > 0, "pool.max_resources", "must be > 0")?;
        check(p.idle_timeout_ms > 0, "pool.idle_timeout_ms", "must be > 0")?;

        self.rate_limits.default.validate("rate_limits.default")?;
        for (target, bucket) in &self.rate_limits.targets {
            bucket.validate(&format!("rate_limits.targets.{target}"))?;
        }

        let r = &self.retry;
        check(r.max_attempts > 0, "retry.max_attempts", "must be > 0")?;
        check(r.multiplier >= 1.0, "retry.multiplier", "must be >= 1.0")?;

        check(!self.database.path.is_empty(), "database.path", "must not be empty")?;
        check(self.database.pool_size > 0, "database.pool_size", "must be > 0")?;
        Ok(())
    }
}

/// `orchestrator` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Run slot cap
    pub max_concurrent_operations: usize,
    /// Default per-operation deadline
    pub operation_timeout_ms: u64,
    /// Upper bound on an adapter's `cleanup()` after the operation ends
    pub cleanup_timeout_ms: u64,
    /// Wait for running operations during shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            cleanup_timeout_ms: DEFAULT_CLEANUP_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

/// What the pool does when a caller's wait for a free resource times out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Create a resource beyond the cap
    #[default]
    Overflow,
    /// Fail with `PoolExhausted`
    Fail,
}

/// `pool` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Session cap
    pub max_resources: usize,
    /// Wait for a free session
    pub acquire_timeout_ms: u64,
    /// Idle time before a free session is closed
    pub idle_timeout_ms: u64,
    /// Behaviour when the wait times out
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_resources: DEFAULT_POOL_MAX_RESOURCES,
            acquire_timeout_ms: DEFAULT_POOL_ACQUIRE_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_POOL_IDLE_TIMEOUT_MS,
            on_exhausted: ExhaustionPolicy::Overflow,
        }
    }
}

/// One token bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSettings {
    /// Tokens per window
    pub capacity: u32,
    /// Refill window
    pub window_ms: u64,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self { capacity: DEFAULT_RATE_LIMIT_CAPACITY, window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS }
    }
}

impl BucketSettings {
    /// Bucket of `capacity` tokens per `window`
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window_ms: window.as_millis() as u64 }
    }

    /// `window_ms` as a `Duration`
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.capacity == 0 || self.window_ms == 0 {
            return Err(TetherError::Config(format!(
                "{field}: capacity and window_ms must be > 0"
            )));
        }
        Ok(())
    }
}

/// `rate_limits` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Bucket for targets without an override
    pub default: BucketSettings,
    /// Per-target overrides keyed by target id
    pub targets: HashMap<String, BucketSettings>,
    /// Fail with `RateLimited` instead of waiting for tokens
    pub non_blocking: bool,
}

/// `retry` section; backoff is exponential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total invocations, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_delay_ms: u64,
    /// Growth factor, at least 1.0
    pub multiplier: f64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Use server `Retry-After` hints, clamped to `max_delay_ms`
    pub respect_retry_after: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            respect_retry_after: false,
        }
    }
}

/// `database` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path
    pub path: String,
    /// Connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: DEFAULT_DB_PATH.to_string(), pool_size: DEFAULT_DB_POOL_SIZE }
    }
}

/// `logging` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: DEFAULT_LOG_LEVEL.to_string(), json: false }
    }
}
