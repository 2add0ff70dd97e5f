//! End-to-end coverage of the composition root against a real SQLite ledger
//!
//! Each test builds a [`SyncContext`] over an isolated database file, runs
//! operations through the orchestrator and checks what the ledger kept.

mod support;

use std::time::Duration;

use support::{FlakyAdapterFactory, StubSessionFactory};
use tempfile::TempDir;
use tether_core::TargetRegistration;
use tether_domain::{
    AvailabilityItem, AvailabilityStatus, Credentials, ErrorCode, OperationPayload,
    OperationRequest, SyncStatus, TetherError,
};
use tether_infra::SyncContext;

fn availability(days: u32) -> OperationPayload {
    let start = chrono::NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
    OperationPayload::PushAvailability(
        (0..days)
            .map(|offset| AvailabilityItem {
                date: start + chrono::Duration::days(i64::from(offset)),
                status: AvailabilityStatus::Available,
                note: None,
            })
            .collect(),
    )
}

fn context_with(dir: &TempDir, adapters: std::sync::Arc<FlakyAdapterFactory>) -> SyncContext {
    let context = SyncContext::init(support::test_config(dir), StubSessionFactory::new())
        .expect("context initialises");
    context
        .register_target(TargetRegistration::new(
            "booking",
            Credentials::password("owner@example.test", "hunter2"),
            adapters,
        ))
        .expect("target registers");
    context
}

/// Validates a tracked operation is persisted as a Success record that
/// survives reopening the database.
///
/// # Test Steps
/// 1. Track an availability push through the context
/// 2. Verify the returned record and result
/// 3. Shut down, reopen a context over the same file
/// 4. Verify history returns the same record
#[tokio::test(flavor = "multi_thread")]
async fn test_tracked_operation_persists_across_restarts() {
    let dir = TempDir::new().unwrap();
    let context = context_with(&dir, FlakyAdapterFactory::healthy());

    let tracked = context
        .track("owner-1", OperationRequest::new("booking", availability(3)))
        .await
        .expect("ledger writes succeed");
    assert!(tracked.result.is_ok());
    assert_eq!(tracked.record.status, SyncStatus::Success);
    assert_eq!(tracked.record.items_processed, 3);

    let report = context.shutdown().await;
    assert_eq!(report.abandoned_operations, 0);
    drop(context);

    let reopened = context_with(&dir, FlakyAdapterFactory::healthy());
    let history = reopened.history("owner-1", 10).await.unwrap();
    assert_eq!(history, vec![tracked.record]);
}

/// Validates that a failure is stored with its code, and that retrying it
/// creates a linked record while the failed one stays untouched.
///
/// # Test Steps
/// 1. Track an operation whose adapter fails once with a 503
/// 2. Verify a Failed record with a transient code
/// 3. Retry the record
/// 4. Verify a new Success record pointing back at the failure
#[tokio::test(flavor = "multi_thread")]
async fn test_failed_record_retry_creates_linked_record() {
    let dir = TempDir::new().unwrap();
    let adapters = FlakyAdapterFactory::new(1, TetherError::upstream(503, "maintenance"));
    let context = context_with(&dir, adapters.clone());

    let failed = context
        .track("owner-1", OperationRequest::new("booking", OperationPayload::ReadProfile))
        .await
        .unwrap()
        .record;
    assert_eq!(failed.status, SyncStatus::Failed);
    assert_eq!(failed.error.as_ref().unwrap().code, ErrorCode::Transient);

    let retried = context.retry(failed.id).await.unwrap();
    assert!(retried.result.is_ok());
    assert_eq!(retried.record.status, SyncStatus::Success);
    assert_eq!(retried.record.retry_of, Some(failed.id));

    let original = context.ledger().get(failed.id).await.unwrap().unwrap();
    assert_eq!(original, failed);

    // A Success record cannot be retried.
    let err = context.retry(retried.record.id).await.unwrap_err();
    assert!(matches!(err, TetherError::InvalidState(_)));
    assert_eq!(adapters.calls(), 2);
}

/// Validates that transient failures are re-submitted under the configured
/// retry policy and permanent ones are not.
#[tokio::test(flavor = "multi_thread")]
async fn test_execute_with_retry_only_retries_transient_errors() {
    let dir = TempDir::new().unwrap();
    let adapters = FlakyAdapterFactory::resetting(2);
    let context = context_with(&dir, adapters.clone());

    let output = context
        .execute_with_retry(OperationRequest::new("booking", OperationPayload::Authenticate))
        .await;
    assert!(output.is_ok(), "{output:?}");
    assert_eq!(adapters.calls(), 3);

    let permanent = FlakyAdapterFactory::new(5, TetherError::Auth("bad password".into()));
    context
        .register_target(TargetRegistration::new(
            "gallery",
            Credentials::api_token("token"),
            permanent.clone(),
        ))
        .unwrap();
    let err = context
        .execute_with_retry(OperationRequest::new("gallery", OperationPayload::ReadProfile))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::Auth(_)));
    assert_eq!(permanent.calls(), 1);
}

/// Validates that retries give up after `max_attempts` total invocations.
#[tokio::test(flavor = "multi_thread")]
async fn test_execute_with_retry_stops_after_max_attempts() {
    let dir = TempDir::new().unwrap();
    let adapters = FlakyAdapterFactory::resetting(10);
    let context = context_with(&dir, adapters.clone());
    assert_eq!(context.retry_config().max_attempts, 3);

    let err = context
        .execute_with_retry(OperationRequest::new("booking", OperationPayload::ReadProfile))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::Network { .. }));
    assert_eq!(adapters.calls(), 3);
    assert_eq!(context.stats().failed_total, 3);
}

/// Validates the context refuses work after shutdown.
#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_rejects_new_operations() {
    let dir = TempDir::new().unwrap();
    let context = context_with(&dir, FlakyAdapterFactory::healthy());

    context.execute(OperationRequest::new("booking", OperationPayload::ReadProfile)).await.unwrap();
    let report = context.shutdown_with_grace(Duration::from_millis(200)).await;
    assert_eq!(report.pool.closed_idle, 1);

    let err = context
        .execute(OperationRequest::new("booking", OperationPayload::ReadProfile))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::ShuttingDown(_)));
}

#[test]
fn test_init_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = support::test_config(&dir);
    config.orchestrator.max_concurrent_operations = 0;

    let result = SyncContext::init(config, StubSessionFactory::new());
    assert!(matches!(result, Err(TetherError::Config(_))));
}
