//! Modular common utilities shared across Tether crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error types and the `ErrorClassification` contract
//! - `runtime`: async resilience primitives (clock, rate limiting, retry)
//! - `observability`: tracing integration (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    with_retry, BackoffStrategy, Clock, MockClock, RateLimitMode, RateLimiter, RateLimiterConfig,
    RetryConfig, RetryConfigBuilder, RetryExecutor, RetryOutcome, SystemClock,
    TokenBucket, TokenBucketConfig,
};
