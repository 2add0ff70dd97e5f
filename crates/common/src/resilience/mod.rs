//! Resilience primitives for fault-tolerant automation
//!
//! - **Clock**: monotonic/wall time behind a trait so timing logic is testable
//! - **Rate limiting**: continuously refilling token buckets keyed by target
//! - **Retry**: bounded retry with exponential backoff driven by
//!   [`ErrorClassification`](crate::ErrorClassification)
//!
//! These types know nothing about targets, adapters or sessions; the
//! orchestration layer in `tether-core` composes them.

pub mod clock;
pub mod rate_limiter;
pub mod retry;

pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{
    RateLimitMode, RateLimiter, RateLimiterConfig, TokenBucket, TokenBucketConfig,
};
pub use retry::{
    with_retry, BackoffStrategy, RetryConfig, RetryConfigBuilder, RetryExecutor, RetryOutcome,
};
