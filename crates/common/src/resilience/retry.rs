//! Bounded retry with exponential backoff
//!
//! Whether an error is worth another attempt is decided by its
//! [`ErrorClassification`]: transient failures (timeouts, resets, DNS, 5xx,
//! 429, rate limiting) are retried, everything else propagates on the first
//! failure. When attempts run out the last error is returned unchanged, so
//! callers never see a wrapper type.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{CommonError, CommonResult, ErrorClassification};

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Linear backoff: initial_delay + (retry * increment)
    Linear { initial_delay: Duration, increment: Duration },
    /// Exponential backoff: initial_delay * base^retry, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl Default for BackoffStrategy {
    /// 1s, 2s, 4s, ... capped at 30s
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_secs(1),
            base: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffStrategy {
    /// Delay before the retry that follows failed attempt number `retry + 1`
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Linear { initial_delay, increment } => {
                *initial_delay + increment.saturating_mul(retry)
            }
            Self::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(delay_ms)
            }
        }
    }

    /// Upper bound on any single delay, if the strategy has one
    pub fn ceiling(&self) -> Option<Duration> {
        match self {
            Self::Fixed(delay) => Some(*delay),
            Self::Linear { .. } => None,
            Self::Exponential { max_delay, .. } => Some(*max_delay),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total invocations, including the first
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: BackoffStrategy,
    /// Honour `ErrorClassification::retry_after` hints over the schedule.
    /// Hints are clamped to the backoff ceiling.
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: BackoffStrategy::default(), respect_retry_after: false }
    }
}

impl RetryConfig {
    /// Create a new configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.max_attempts == 0 {
            return Err(CommonError::config_field("max_attempts", "must be at least 1"));
        }
        if let BackoffStrategy::Exponential { base, .. } = self.backoff {
            if base < 1.0 {
                return Err(CommonError::config_field("multiplier", "must be at least 1.0"));
            }
        }
        Ok(())
    }
}

/// Builder for RetryConfig
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Builder seeded with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts, including the first
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Wait the same `delay` between attempts
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    /// Grow the wait by `increment` after each attempt
    pub fn linear_backoff(mut self, initial_delay: Duration, increment: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Linear { initial_delay, increment };
        self
    }

    /// Multiply the wait by `base` after each attempt, capped at `max_delay`
    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    /// Honour `retry_after` hints from the error, clamped to the backoff ceiling
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.config.respect_retry_after = respect;
        self
    }

    /// Validate and return the config
    pub fn build(self) -> CommonResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Result of a retried execution plus the attempt history
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Last attempt's result
    pub result: Result<T, E>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Sum of `delays`
    pub total_delay: Duration,
    /// Delays slept between consecutive attempts, in order
    pub delays: Vec<Duration>,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs fallible async operations under a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Executor for `config`
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The config this executor retries with
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        E: ErrorClassification + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Execute an operation with retry logic and return the attempt history.
    #[instrument(skip_all, fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        E: ErrorClassification + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delays = Vec::new();
        let mut total_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay, delays };
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(attempt, error = %error, "permanent failure, not retrying");
                return RetryOutcome { result: Err(error), attempts: attempt, total_delay, delays };
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "all retry attempts exhausted");
                return RetryOutcome { result: Err(error), attempts: attempt, total_delay, delays };
            }

            let scheduled = self.config.backoff.calculate_delay(attempt - 1);
            let delay = match error.retry_after() {
                Some(hint) if self.config.respect_retry_after => {
                    self.config.backoff.ceiling().map_or(hint, |ceiling| hint.min(ceiling))
                }
                _ => scheduled,
            };

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            delays.push(delay);
            total_delay += delay;
        }
    }
}

/// Invoke `operation` up to `max_attempts` times with 1s, 2s, 4s, ... between
/// transient failures.
pub async fn with_retry<F, Fut, T, E>(max_attempts: u32, operation: F) -> Result<T, E>
where
    E: ErrorClassification + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let config = RetryConfig { max_attempts, ..RetryConfig::default() };
    RetryExecutor::new(config).execute(operation).await
}
