//! Error types used throughout Tether

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_common::{CommonError, ErrorClassification, ErrorSeverity};
use thiserror::Error;

use crate::types::ErrorCode;

/// Transport-level failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// Request or connect timed out
    Timeout,
    /// Peer dropped the connection
    ConnectionReset,
    /// Name resolution failed
    Dns,
    /// Host unreachable or refusing connections
    Unavailable,
    /// Malformed exchange; retrying will not help
    Protocol,
}

impl NetworkErrorKind {
    /// Protocol errors are deterministic; every other transport failure may
    /// clear up on its own.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Protocol)
    }
}

/// Main error type for Tether
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum TetherError {
    /// Storage layer failure
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure talking to a platform
    #[error("Network error ({kind:?}): {message}")]
    Network {
        /// Failure category
        kind: NetworkErrorKind,
        /// Transport error text
        message: String,
    },

    /// Non-success HTTP status from a platform
    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
        /// Parsed `Retry-After` header
        retry_after_secs: Option<u64>,
    },

    /// Credentials rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Caller supplied a value the operation cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown target or record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Token bucket empty in non-blocking mode
    #[error("Rate limit exceeded for '{key}'")]
    RateLimited {
        /// Bucket key, usually the target id
        key: String,
        /// Time until the next token
        retry_after_ms: Option<u64>,
    },

    /// Deadline elapsed before the operation finished
    #[error("Operation '{operation}' timed out after {after_ms}ms")]
    Timeout {
        /// What timed out
        operation: String,
        /// Deadline that elapsed
        after_ms: u64,
    },

    /// Session creation or teardown failed
    #[error("Resource pool error: {0}")]
    Pool(String),

    /// No resource freed up in time and the policy is `Fail`
    #[error("Resource pool exhausted: {max_resources} in use after waiting {waited_ms}ms")]
    PoolExhausted {
        /// Pool cap
        max_resources: usize,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Rejected because shutdown has started
    #[error("Shutting down: {0}")]
    ShuttingDown(String),

    /// Platform adapter failure not covered above
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Transition not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Bug or broken invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

impl TetherError {
    /// Network error of `kind`
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network { kind, message: message.into() }
    }

    /// Upstream error without a `Retry-After` hint
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream { status, message: message.into(), retry_after_secs: None }
    }

    /// Timeout for `operation` after `after`
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { operation: operation.into(), after_ms: after.as_millis() as u64 }
    }

    /// Stable code stored on failed ledger records
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) => ErrorCode::Storage,
            Self::Config(_) => ErrorCode::Config,
            Self::Network { .. } => ErrorCode::Transient,
            Self::Upstream { status, .. } => match *status {
                429 => ErrorCode::RateLimited,
                401 | 403 => ErrorCode::Authentication,
                404 => ErrorCode::NotFound,
                500..=599 => ErrorCode::Transient,
                _ => ErrorCode::Validation,
            },
            Self::Auth(_) => ErrorCode::Authentication,
            Self::InvalidInput(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Pool(_) | Self::PoolExhausted { .. } => ErrorCode::Pool,
            Self::ShuttingDown(_) => ErrorCode::Shutdown,
            Self::Adapter(_) => ErrorCode::Adapter,
            Self::InvalidState(_) | Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl ErrorClassification for TetherError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network { kind, .. } => kind.is_transient(),
            Self::Upstream { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Network { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => {
                ErrorSeverity::Warning
            }
            Self::Upstream { .. } if self.is_retryable() => ErrorSeverity::Warning,
            Self::NotFound(_) | Self::ShuttingDown(_) => ErrorSeverity::Info,
            Self::InvalidState(_) | Self::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::InvalidState(_) | Self::Internal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Upstream { retry_after_secs: Some(secs), .. } => Some(Duration::from_secs(*secs)),
            Self::RateLimited { retry_after_ms: Some(ms), .. } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<CommonError> for TetherError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::RateLimitExceeded { key, retry_after, .. } => Self::RateLimited {
                key: key.unwrap_or_default(),
                retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            },
            CommonError::Timeout { operation, duration } => {
                Self::network(NetworkErrorKind::Timeout, format!("{operation} after {duration:?}"))
            }
            CommonError::Backend { service, message, is_retryable: true } => {
                Self::network(NetworkErrorKind::Unavailable, format!("{service}: {message}"))
            }
            CommonError::Backend { service, message, is_retryable: false } => {
                Self::Adapter(format!("{service}: {message}"))
            }
            CommonError::Config { .. } => Self::Config(err.to_string()),
            CommonError::Persistence { .. } => Self::Database(err.to_string()),
            CommonError::Validation { .. } => Self::InvalidInput(err.to_string()),
            CommonError::NotFound { .. } => Self::NotFound(err.to_string()),
            CommonError::Serialization { .. } | CommonError::Internal { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON: {err}"))
    }
}
