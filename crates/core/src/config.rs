//! Runtime configuration for the orchestration layer
//!
//! These are the validated, `Duration`-typed counterparts of the serialisable
//! sections in [`tether_domain::Config`].

use std::time::Duration;

use tether_common::{RateLimitMode, RateLimiterConfig, RetryConfig, TokenBucketConfig};
use tether_domain::constants::{
    DEFAULT_CLEANUP_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_OPERATIONS, DEFAULT_OPERATION_TIMEOUT_MS,
    DEFAULT_POOL_ACQUIRE_TIMEOUT_MS, DEFAULT_POOL_IDLE_TIMEOUT_MS, DEFAULT_POOL_MAX_RESOURCES,
    DEFAULT_SHUTDOWN_GRACE_MS, OPERATION_EVENT_CAPACITY,
};
use tether_domain::{
    BucketSettings, ExhaustionPolicy, OrchestratorSettings, PoolSettings, RateLimitSettings,
    Result, RetrySettings, TetherError,
};

/// Resource pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Live sessions the pool may hold at once
    pub max_resources: usize,
    /// Default wait used by callers that do not pass their own
    pub acquire_timeout: Duration,
    /// How long a released session stays warm before it is closed
    pub idle_timeout: Duration,
    /// What `acquire` does when every slot is taken
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_resources: DEFAULT_POOL_MAX_RESOURCES,
            acquire_timeout: Duration::from_millis(DEFAULT_POOL_ACQUIRE_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_POOL_IDLE_TIMEOUT_MS),
            on_exhausted: ExhaustionPolicy::Overflow,
        }
    }
}

impl PoolConfig {
    /// Builder seeded with the defaults
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Check the invariants `ResourcePool::new` relies on
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_resources == 0 {
            return Err("max_resources must be greater than 0".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_resources: settings.max_resources,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            idle_timeout: Duration::from_millis(settings.idle_timeout_ms),
            on_exhausted: settings.on_exhausted,
        }
    }
}

/// Builder for [`PoolConfig`]
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the session cap
    pub fn max_resources(mut self, max: usize) -> Self {
        self.config.max_resources = max;
        self
    }

    /// Set the default acquire wait
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the idle close delay
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the exhaustion policy
    pub fn on_exhausted(mut self, policy: ExhaustionPolicy) -> Self {
        self.config.on_exhausted = policy;
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate().map_err(TetherError::Config)?;
        Ok(self.config)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Operations allowed to hold a run slot at once
    pub max_concurrent_operations: usize,
    /// Default per-operation deadline; requests may override it
    pub operation_timeout: Duration,
    /// Upper bound on an adapter's `cleanup` call
    pub cleanup_timeout: Duration,
    /// How long `shutdown` waits for running operations
    pub shutdown_grace: Duration,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            cleanup_timeout: Duration::from_millis(DEFAULT_CLEANUP_TIMEOUT_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            event_capacity: OPERATION_EVENT_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// Builder seeded with the defaults
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Check the invariants `Orchestrator::new` relies on
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_concurrent_operations == 0 {
            return Err("max_concurrent_operations must be greater than 0".to_string());
        }
        if self.operation_timeout.is_zero() {
            return Err("operation_timeout must be greater than zero".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            max_concurrent_operations: settings.max_concurrent_operations,
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms),
            cleanup_timeout: Duration::from_millis(settings.cleanup_timeout_ms),
            shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
            event_capacity: OPERATION_EVENT_CAPACITY,
        }
    }
}

/// Builder for [`OrchestratorConfig`]
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the run slot cap
    pub fn max_concurrent_operations(mut self, max: usize) -> Self {
        self.config.max_concurrent_operations = max;
        self
    }

    /// Set the default operation deadline
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Set the cleanup bound
    pub fn cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.config.cleanup_timeout = timeout;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate().map_err(TetherError::Config)?;
        Ok(self.config)
    }
}

fn bucket(settings: &BucketSettings) -> TokenBucketConfig {
    TokenBucketConfig::new(settings.capacity, settings.window())
}

/// Keyed limiter configuration from the `rate_limits` section
pub fn rate_limiter_config(settings: &RateLimitSettings) -> RateLimiterConfig {
    RateLimiterConfig {
        default: bucket(&settings.default),
        overrides: settings.targets.iter().map(|(k, v)| (k.clone(), bucket(v))).collect(),
        mode: if settings.non_blocking {
            RateLimitMode::NonBlocking
        } else {
            RateLimitMode::Blocking
        },
    }
}

/// Retry configuration from the `retry` section
pub fn retry_config(settings: &RetrySettings) -> Result<RetryConfig> {
    Ok(RetryConfig::builder()
        .max_attempts(settings.max_attempts)
        .exponential_backoff(
            Duration::from_millis(settings.initial_delay_ms),
            settings.multiplier,
            Duration::from_millis(settings.max_delay_ms),
        )
        .respect_retry_after(settings.respect_retry_after)
        .build()?)
}
