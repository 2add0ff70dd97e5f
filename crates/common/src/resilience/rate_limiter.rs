//! Token bucket rate limiting keyed by target
//!
//! Each key owns a bucket of `capacity` tokens that refills continuously at
//! `capacity / window` tokens per second. A caller consuming more tokens than
//! are available either waits for the deficit to refill
//! ([`RateLimitMode::Blocking`]) or fails with
//! [`CommonError::RateLimitExceeded`] ([`RateLimitMode::NonBlocking`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use super::{Clock, SystemClock};
use crate::error::{CommonError, CommonResult};

/// Capacity and refill window of a single bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: u32,
    /// Time it takes an empty bucket to refill completely
    pub window: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { capacity: 10, window: Duration::from_secs(60) }
    }
}

impl TokenBucketConfig {
    /// Bucket with `capacity` tokens refilled over `window`
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Tokens added per second of elapsed time
    pub fn refill_per_sec(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Continuously refilling token bucket
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// use tether_common::resilience::{TokenBucket, TokenBucketConfig};
///
/// let bucket = TokenBucket::new(TokenBucketConfig::new(2, Duration::from_secs(60))).unwrap();
/// assert!(bucket.try_consume(1).is_ok());
/// assert!(bucket.try_consume(1).is_ok());
/// assert!(bucket.try_consume(1).is_err());
/// ```
#[derive(Debug)]
pub struct TokenBucket<C: Clock = SystemClock> {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
    clock: Arc<C>,
}

impl TokenBucket<SystemClock> {
    /// Create a full bucket on the system clock
    pub fn new(config: TokenBucketConfig) -> Result<Self, String> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a full bucket with a custom clock
    pub fn with_clock(config: TokenBucketConfig, clock: C) -> Result<Self, String> {
        Self::with_shared_clock(config, Arc::new(clock))
    }

    fn with_shared_clock(config: TokenBucketConfig, clock: Arc<C>) -> Result<Self, String> {
        config.validate()?;
        let state = BucketState { tokens: f64::from(config.capacity), last_refill: clock.now() };
        Ok(Self { config, state: Mutex::new(state), clock })
    }

    /// Bucket configuration
    pub fn config(&self) -> TokenBucketConfig {
        self.config
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let added = elapsed.as_secs_f64() * self.config.refill_per_sec();
        state.tokens = (state.tokens + added).min(f64::from(self.config.capacity));
        state.last_refill = now;
    }

    /// Take `cost` tokens if they are available.
    ///
    /// On shortfall nothing is taken and the time until the deficit has
    /// refilled is returned.
    pub fn try_consume(&self, cost: u32) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let cost = f64::from(cost);
        if state.tokens >= cost {
            state.tokens -= cost;
            return Ok(());
        }

        let deficit = cost - state.tokens;
        let wait = Duration::from_secs_f64(deficit / self.config.refill_per_sec());
        debug!(tokens = state.tokens, cost, wait_ms = wait.as_millis() as u64, "bucket short");
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Tokens currently available (fractional while refilling)
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

/// What `consume` does when a bucket is short
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateLimitMode {
    /// Suspend the caller until the tokens have refilled
    #[default]
    Blocking,
    /// Fail immediately with `RateLimitExceeded`
    NonBlocking,
}

/// Keyed limiter configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimiterConfig {
    /// Bucket used for keys without an override
    pub default: TokenBucketConfig,
    /// Per-key bucket overrides
    pub overrides: HashMap<String, TokenBucketConfig>,
    /// Behaviour on shortfall
    pub mode: RateLimitMode,
}

impl RateLimiterConfig {
    /// Validate the default bucket and every override
    pub fn validate(&self) -> Result<(), String> {
        self.default.validate().map_err(|e| format!("default: {e}"))?;
        for (key, bucket) in &self.overrides {
            bucket.validate().map_err(|e| format!("{key}: {e}"))?;
        }
        Ok(())
    }
}

/// Per-key token bucket limiter
///
/// Buckets are created lazily on first use of a key.
#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    default: TokenBucketConfig,
    mode: RateLimitMode,
    overrides: DashMap<String, TokenBucketConfig>,
    buckets: DashMap<String, Arc<TokenBucket<C>>>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    /// Create a limiter on the system clock
    pub fn new(config: RateLimiterConfig) -> CommonResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter with a custom clock
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> CommonResult<Self> {
        config.validate().map_err(|e| CommonError::config_field("rate_limits", e))?;
        Ok(Self {
            default: config.default,
            mode: config.mode,
            overrides: config.overrides.into_iter().collect(),
            buckets: DashMap::new(),
            clock: Arc::new(clock),
        })
    }

    /// Configured shortfall behaviour
    pub fn mode(&self) -> RateLimitMode {
        self.mode
    }

    /// Install or replace the bucket for `key`. The new bucket starts full.
    pub fn configure(&self, key: &str, config: TokenBucketConfig) -> CommonResult<()> {
        config.validate().map_err(|e| CommonError::config_field(key, e))?;
        self.overrides.insert(key.to_string(), config);
        self.buckets.remove(key);
        Ok(())
    }

    /// Forget the bucket and any override for `key`
    pub fn remove(&self, key: &str) {
        self.overrides.remove(key);
        self.buckets.remove(key);
    }

    /// Effective configuration for `key`
    pub fn config_for(&self, key: &str) -> TokenBucketConfig {
        self.overrides.get(key).map(|c| *c).unwrap_or(self.default)
    }

    fn bucket(&self, key: &str) -> CommonResult<Arc<TokenBucket<C>>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Ok(Arc::clone(&bucket));
        }
        let config = self.config_for(key);
        let entry = self.buckets.entry(key.to_string());
        let bucket = match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => Arc::clone(e.get()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let bucket = TokenBucket::with_shared_clock(config, Arc::clone(&self.clock))
                    .map_err(|e| CommonError::config_field(key, e))?;
                Arc::clone(e.insert(Arc::new(bucket)).value())
            }
        };
        Ok(bucket)
    }

    fn check_cost(&self, key: &str, bucket: &TokenBucket<C>, cost: u32) -> CommonResult<()> {
        if cost > bucket.config().capacity {
            return Err(CommonError::validation(
                "cost",
                format!(
                    "cost {cost} exceeds capacity {} of bucket '{key}'",
                    bucket.config().capacity
                ),
            ));
        }
        Ok(())
    }

    /// Take `cost` tokens without waiting, regardless of mode
    pub fn try_consume(&self, key: &str, cost: u32) -> CommonResult<()> {
        let bucket = self.bucket(key)?;
        self.check_cost(key, &bucket, cost)?;
        bucket.try_consume(cost).map_err(|wait| {
            warn!(key, cost, "rate limit exceeded");
            CommonError::rate_limit(key, u64::from(bucket.config().capacity), Some(wait))
        })
    }

    /// Take `cost` tokens for `key`, honouring the configured mode.
    ///
    /// A cost larger than the bucket capacity can never be satisfied and is
    /// rejected as a validation error in both modes.
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn consume(&self, key: &str, cost: u32) -> CommonResult<()> {
        if self.mode == RateLimitMode::NonBlocking {
            return self.try_consume(key, cost);
        }

        let bucket = self.bucket(key)?;
        self.check_cost(key, &bucket, cost)?;
        loop {
            match bucket.try_consume(cost) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    debug!(key, wait_ms = wait.as_millis() as u64, "waiting for tokens");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Tokens currently available for `key`
    pub fn available(&self, key: &str) -> CommonResult<f64> {
        Ok(self.bucket(key)?.available())
    }
}
