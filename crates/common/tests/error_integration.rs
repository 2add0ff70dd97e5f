//! Integration tests for `tether_common::error`.
//!
//! These suites validate classification and module error delegation so that
//! retry loops and the ledger see consistent failure semantics.

use std::time::Duration;

use tether_common::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Validates that each `CommonError` variant reports the expected retryable,
/// severity and criticality combination.
#[test]
fn classification_matrix_matches_expected_contract() {
    let cases = vec![
        (CommonError::config("missing api key"), false, ErrorSeverity::Error, false),
        (CommonError::rate_limit("site-a", 10, None), true, ErrorSeverity::Warning, false),
        (
            CommonError::timeout("push_availability", Duration::from_secs(60)),
            true,
            ErrorSeverity::Warning,
            false,
        ),
        (CommonError::backend("booking-api", "502", true), true, ErrorSeverity::Error, false),
        (CommonError::backend("booking-api", "403", false), false, ErrorSeverity::Error, false),
        (CommonError::validation("cost", "exceeds capacity"), false, ErrorSeverity::Error, false),
        (CommonError::not_found_with_id("target", "site-z"), false, ErrorSeverity::Info, false),
        (CommonError::persistence("disk full"), false, ErrorSeverity::Error, false),
        (CommonError::internal("invariant broken"), false, ErrorSeverity::Critical, true),
    ];

    for (err, retryable, severity, critical) in cases {
        assert_eq!(err.is_retryable(), retryable, "{err}");
        assert_eq!(err.severity(), severity, "{err}");
        assert_eq!(err.is_critical(), critical, "{err}");
    }
}

/// Validates that display strings carry the identifying context.
#[test]
fn display_includes_context() {
    assert_eq!(
        CommonError::config_field("pool.max_resources", "must be > 0").to_string(),
        "Configuration error in field 'pool.max_resources': must be > 0"
    );
    assert_eq!(
        CommonError::not_found_with_id("target", "site-z").to_string(),
        "target not found: 'site-z'"
    );
    assert!(CommonError::rate_limit("site-a", 2, Some(Duration::from_secs(30)))
        .to_string()
        .contains("capacity 2"));
}

#[derive(Debug, Error)]
enum LedgerError {
    #[error("record {0} is already terminal")]
    Terminal(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl ErrorClassification for LedgerError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Terminal(_) => false,
            Self::Common(inner) => inner.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Terminal(_) => ErrorSeverity::Critical,
            Self::Common(inner) => inner.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Common(inner) => inner.retry_after(),
            Self::Terminal(_) => None,
        }
    }
}

fn load_record(id: &str) -> CommonResult<String> {
    Err(CommonError::timeout(format!("load {id}"), Duration::from_millis(250)))
}

fn mutate(id: &str) -> Result<String, LedgerError> {
    Ok(load_record(id)?)
}

/// Validates that module errors composed over `CommonError` delegate
/// classification and keep `?` ergonomics.
#[test]
fn module_errors_delegate_classification() {
    let err = mutate("rec-1").unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.severity(), ErrorSeverity::Warning);

    let terminal = LedgerError::Terminal("rec-2".to_string());
    assert!(terminal.is_critical());
    assert!(!terminal.is_retryable());
    assert_eq!(terminal.to_string(), "record rec-2 is already terminal");
}

/// Validates standard conversions from serde and io errors.
#[test]
fn foreign_errors_convert() {
    let json: CommonError = serde_json::from_str::<Vec<u8>>("{").unwrap_err().into();
    assert_eq!(json.error_type_name(), "serialization");

    let io: CommonError = std::io::Error::new(std::io::ErrorKind::Other, "denied").into();
    assert_eq!(io.error_type_name(), "persistence");
}
