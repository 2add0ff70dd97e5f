//! Common error types and classification shared by every Tether crate
//!
//! The error handling system is built on three pieces:
//!
//! 1. **`CommonError`**: the error patterns that show up in more than one
//!    crate (rate limiting, timeouts, configuration, backend failures, ...).
//! 2. **`ErrorClassification`**: the contract every error type implements so
//!    retry loops can tell transient failures from permanent ones without
//!    knowing the concrete type.
//! 3. **`ErrorSeverity`**: a unified severity scale for logging decisions.
//!
//! ## Standard Error Patterns
//!
//! | Pattern | CommonError Variant | Retryable |
//! |---------|-------------------|-----------|
//! | **Rate Limiting** | `RateLimitExceeded` | yes |
//! | **Timeouts** | `Timeout` | yes |
//! | **Backend** | `Backend` | caller decides |
//! | **Configuration** | `Config` | no |
//! | **Serialization** | `Serialization` | no |
//! | **Persistence** | `Persistence` | no |
//! | **Validation** | `Validation` | no |
//! | **Not Found** | `NotFound` | no |
//! | **Internal** | `Internal` | no |
//!
//! ## Module-specific errors
//!
//! Module errors compose with `CommonError` rather than duplicating it:
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum LedgerError {
//!     #[error("record {0} is already terminal")]
//!     Terminal(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple crates
#[derive(Debug, Clone, PartialEq)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// Data persistence errors (file I/O, database, etc.)
    Persistence { message: String, operation: Option<String> },

    /// Rate limiting errors
    RateLimitExceeded { key: Option<String>, limit: Option<u64>, retry_after: Option<Duration> },

    /// Timeout errors
    Timeout { operation: String, duration: Duration },

    /// Network or backend connectivity errors
    Backend { service: String, message: String, is_retryable: bool },

    /// Validation errors
    Validation { field: String, message: String },

    /// Resource not found errors
    NotFound { resource_type: String, identifier: Option<String> },

    /// Internal errors that shouldn't normally occur
    Internal { message: String, context: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "Configuration error in field '{}': {}", field, message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            Self::Persistence { message, operation } => {
                if let Some(op) = operation {
                    write!(f, "Persistence error during '{}': {}", op, message)
                } else {
                    write!(f, "Persistence error: {}", message)
                }
            }
            Self::RateLimitExceeded { key, limit, retry_after } => {
                let mut msg = "Rate limit exceeded".to_string();
                if let Some(key) = key {
                    msg.push_str(&format!(" for '{}'", key));
                }
                if let Some(limit) = limit {
                    msg.push_str(&format!(" (capacity {})", limit));
                }
                if let Some(retry) = retry_after {
                    msg.push_str(&format!(" (retry in {:?})", retry));
                }
                write!(f, "{}", msg)
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Backend { service, message, .. } => {
                write!(f, "Backend error from '{}': {}", service, message)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            Self::NotFound { resource_type, identifier } => {
                if let Some(id) = identifier {
                    write!(f, "{} not found: '{}'", resource_type, id)
                } else {
                    write!(f, "{} not found", resource_type)
                }
            }
            Self::Internal { message, context } => {
                if let Some(ctx) = context {
                    write!(f, "Internal error in '{}': {}", ctx, message)
                } else {
                    write!(f, "Internal error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } => true,
            Self::Timeout { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::Error,
            Self::Serialization { .. } => ErrorSeverity::Error,
            Self::Persistence { .. } => ErrorSeverity::Error,
            Self::RateLimitExceeded { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Backend { .. } => ErrorSeverity::Error,
            Self::Validation { .. } => ErrorSeverity::Error,
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a simple persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Create a rate limit error for a bucket key
    pub fn rate_limit<K: Into<String>>(
        key: K,
        limit: u64,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::RateLimitExceeded { key: Some(key.into()), limit: Some(limit), retry_after }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create a not found error with identifier
    pub fn not_found_with_id<T: Into<String>, I: Into<String>>(
        resource_type: T,
        identifier: I,
    ) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: Some(identifier.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), context: None }
    }

    /// Stable label for metrics and structured logs
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Serialization { .. } => "serialization",
            Self::Persistence { .. } => "persistence",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Error classification trait for consistent error handling across crates
///
/// Retry loops, the orchestrator and the sync ledger only ever look at errors
/// through this trait.
///
/// # Example
///
/// ```rust,ignore
/// use tether_common::{ErrorClassification, ErrorSeverity};
///
/// impl ErrorClassification for MyError {
///     fn is_retryable(&self) -> bool {
///         matches!(self, Self::Transient(_))
///     }
///
///     fn severity(&self) -> ErrorSeverity {
///         match self {
///             Self::Transient(_) => ErrorSeverity::Warning,
///             Self::Permanent(_) => ErrorSeverity::Error,
///         }
///     }
///
///     fn is_critical(&self) -> bool {
///         false
///     }
///
///     fn retry_after(&self) -> Option<Duration> {
///         None
///     }
/// }
/// ```
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again:
    /// - Connection timeouts and resets
    /// - Name resolution failures
    /// - HTTP 5xx responses
    /// - HTTP 429 / rate limiting
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when the failing side told us how long to
    /// wait (e.g. a `Retry-After` header).
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}
