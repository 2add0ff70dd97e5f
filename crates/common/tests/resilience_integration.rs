//! Integration tests for the resilience module
//!
//! Exercises retry backoff and keyed rate limiting against tokio's paused
//! clock so timing assertions are exact.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use tether_common::resilience::{
    with_retry, RateLimitMode, RateLimiter, RateLimiterConfig, RetryConfig, RetryExecutor,
    TokenBucketConfig,
};
use tokio::time::Instant;

/// Error with an explicit transient/permanent flag
#[derive(Debug, Clone)]
struct TestError {
    message: String,
    transient: bool,
    retry_after: Option<Duration>,
}

impl TestError {
    fn transient(message: &str) -> Self {
        Self { message: message.to_string(), transient: true, retry_after: None }
    }

    fn permanent(message: &str) -> Self {
        Self { message: message.to_string(), transient: false, retry_after: None }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ErrorClassification for TestError {
    fn is_retryable(&self) -> bool {
        self.transient
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Validates that k transient failures followed by a success take exactly
/// k+1 invocations with 1s, 2s, 4s between them.
#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_exponentially() {
    let calls = Arc::new(AtomicU32::new(0));
    let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let executor = RetryExecutor::new(RetryConfig { max_attempts: 4, ..RetryConfig::default() });

    let outcome = executor
        .execute_with_outcome(|| {
            let calls = Arc::clone(&calls);
            let stamps = Arc::clone(&stamps);
            async move {
                stamps.lock().push(Instant::now());
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(TestError::transient("connection reset"))
                } else {
                    Ok("pushed")
                }
            }
        })
        .await;

    assert_eq!(outcome.result.unwrap(), "pushed");
    assert_eq!(outcome.attempts, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        outcome.delays,
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );

    let stamps = stamps.lock();
    let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([1u64, 2, 4]) {
        assert!(*gap >= Duration::from_secs(expected));
        assert!(*gap < Duration::from_secs(expected) + Duration::from_millis(50));
    }
}

/// Validates that a permanent error is surfaced after one call with no delay.
#[tokio::test(start_paused = true)]
async fn permanent_error_propagates_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let result: Result<(), TestError> = with_retry(3, || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::permanent("invalid credentials"))
        }
    })
    .await;

    assert_eq!(result.unwrap_err().message, "invalid credentials");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

/// Validates that exhausted attempts return the last error, not a wrapper.
#[tokio::test(start_paused = true)]
async fn exhausted_attempts_return_last_error() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), TestError> = with_retry(3, || {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(TestError::transient(&format!("503 on attempt {n}")))
        }
    })
    .await;

    assert_eq!(result.unwrap_err().message, "503 on attempt 3");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Fails with a 429 carrying `hint` on the first call, then succeeds.
async fn rate_limited_once(calls: Arc<AtomicU32>, hint: Duration) -> Result<(), TestError> {
    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
        Err(TestError { message: "429".to_string(), transient: true, retry_after: Some(hint) })
    } else {
        Ok(())
    }
}

/// Validates that retry hints are ignored unless enabled, so a 429 with a
/// huge `Retry-After` still follows the 1s schedule.
#[tokio::test(start_paused = true)]
async fn retry_after_hint_ignored_by_default() {
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let outcome = RetryExecutor::new(RetryConfig::default())
        .execute_with_outcome(|| rate_limited_once(Arc::clone(&calls), Duration::from_secs(3600)))
        .await;

    assert!(outcome.result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.delays, vec![Duration::from_secs(1)]);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// Validates that an enabled hint replaces the schedule but never exceeds
/// the backoff ceiling.
///
/// # Test Steps
/// 1. Enable `respect_retry_after` with a 30s maximum delay
/// 2. Fail once with a 7s hint, then once with a 3600s hint
/// 3. Verify the 7s hint is used as-is and the 3600s hint is clamped
#[tokio::test(start_paused = true)]
async fn retry_after_hint_is_clamped_when_enabled() {
    let config = RetryConfig::builder()
        .exponential_backoff(Duration::from_secs(1), 2.0, Duration::from_secs(30))
        .respect_retry_after(true)
        .build()
        .unwrap();
    let executor = RetryExecutor::new(config);

    let calls = Arc::new(AtomicU32::new(0));
    let short = executor
        .execute_with_outcome(|| rate_limited_once(Arc::clone(&calls), Duration::from_secs(7)))
        .await;
    assert_eq!(short.delays, vec![Duration::from_secs(7)]);

    let calls = Arc::new(AtomicU32::new(0));
    let long = executor
        .execute_with_outcome(|| rate_limited_once(Arc::clone(&calls), Duration::from_secs(3600)))
        .await;
    assert!(long.result.is_ok());
    assert_eq!(long.delays, vec![Duration::from_secs(30)]);
}

/// Validates that `CommonError` works directly as a retry error type.
#[tokio::test(start_paused = true)]
async fn common_error_rate_limit_is_retried() {
    let calls = Arc::new(AtomicU32::new(0));

    let result = with_retry(2, || {
        let calls = Arc::clone(&calls);
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CommonError::rate_limit("site-a", 2, None))
            } else {
                Ok(42)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

fn limiter(mode: RateLimitMode) -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        default: TokenBucketConfig::new(2, Duration::from_secs(60)),
        mode,
        ..RateLimiterConfig::default()
    })
    .unwrap()
}

/// Validates that a third consume inside a capacity-2/60s window blocks until
/// a token has refilled.
#[tokio::test(start_paused = true)]
async fn blocking_mode_waits_for_refill() {
    let limiter = limiter(RateLimitMode::Blocking);
    let started = Instant::now();

    limiter.consume("site-a", 1).await.unwrap();
    limiter.consume("site-a", 1).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1));

    limiter.consume("site-a", 1).await.unwrap();

    // One token per 30s.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(30));
    assert!(waited < Duration::from_secs(31));
}

/// Validates that a third consume inside the window is rejected, never let
/// through, in non-blocking mode.
#[tokio::test(start_paused = true)]
async fn non_blocking_mode_rejects_third_call() {
    let limiter = limiter(RateLimitMode::NonBlocking);

    limiter.consume("site-a", 1).await.unwrap();
    limiter.consume("site-a", 1).await.unwrap();
    let err = limiter.consume("site-a", 1).await.unwrap_err();

    assert!(matches!(err, CommonError::RateLimitExceeded { .. }));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(limiter.consume("site-a", 1).await.is_ok());
}

/// Validates that concurrent blocked consumers are all eventually admitted
/// and the bucket never goes negative.
#[tokio::test(start_paused = true)]
async fn concurrent_blocking_consumers_are_paced() {
    let limiter = Arc::new(limiter(RateLimitMode::Blocking));
    let started = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.consume("site-a", 1).await.unwrap();
                Instant::now()
            })
        })
        .collect();

    let mut admitted = Vec::new();
    for handle in handles {
        admitted.push(handle.await.unwrap() - started);
    }
    admitted.sort();

    // Two immediately, then one per refill period.
    assert!(admitted[1] < Duration::from_millis(1));
    assert!(admitted[2] >= Duration::from_secs(30));
    assert!(admitted[3] >= Duration::from_secs(60));
    assert!(limiter.available("site-a").unwrap() >= 0.0);
}
