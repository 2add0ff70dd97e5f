//! Sync ledger service - record lifecycle and replay

use std::sync::Arc;

use chrono::Utc;
use tether_domain::{
    CompletionReport, OperationKind, OperationOutput, OperationRequest, RecordId, Result,
    SyncErrorDetail, SyncRecord, SyncStatus, TetherError,
};
use tracing::{error, info, instrument, warn};

use super::ports::{OperationDispatcher, SyncRecordRepository};

/// Outcome of a ledger-tracked operation
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOperation {
    /// The record in its final state
    pub record: SyncRecord,
    /// What the dispatcher returned
    pub result: Result<OperationOutput>,
}

/// Records every attempted operation and its outcome
///
/// A record starts Pending and moves exactly once to Success, Partial or
/// Failed. Terminal records never change; retrying a failure creates a new
/// record pointing back at it.
pub struct SyncLedger {
    repository: Arc<dyn SyncRecordRepository>,
}

impl SyncLedger {
    /// Ledger writing through `repository`
    pub fn new(repository: Arc<dyn SyncRecordRepository>) -> Self {
        Self { repository }
    }

    /// Open a Pending record without a replayable payload
    #[instrument(skip(self))]
    pub async fn begin(
        &self,
        owner_id: &str,
        target_id: &str,
        kind: OperationKind,
        items_total: u32,
    ) -> Result<SyncRecord> {
        let record = SyncRecord::pending(owner_id, target_id, kind, items_total, Utc::now());
        self.repository.insert(&record).await?;
        info!(record_id = %record.id, "sync record opened");
        Ok(record)
    }

    /// Open a Pending record that keeps `request`'s payload for replay
    #[instrument(skip(self, request), fields(target_id = %request.target_id, kind = %request.kind()))]
    pub async fn begin_with_payload(
        &self,
        owner_id: &str,
        request: &OperationRequest,
    ) -> Result<SyncRecord> {
        let record = SyncRecord::pending(
            owner_id,
            &request.target_id,
            request.kind(),
            request.payload.items_total(),
            Utc::now(),
        )
        .with_request(request);
        self.repository.insert(&record).await?;
        info!(record_id = %record.id, "sync record opened");
        Ok(record)
    }

    async fn load_pending(&self, record_id: RecordId) -> Result<SyncRecord> {
        let record = self
            .repository
            .get(record_id)
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("sync record {record_id}")))?;
        if record.is_terminal() {
            error!(
                record_id = %record_id,
                status = %record.status,
                "attempt to modify a terminal sync record"
            );
            return Err(TetherError::InvalidState(format!(
                "sync record {record_id} is already {}",
                record.status
            )));
        }
        Ok(record)
    }

    fn stamp(record: &mut SyncRecord) {
        let completed_at = Utc::now();
        record.duration_ms = Some((completed_at - record.started_at).num_milliseconds().max(0));
        record.completed_at = Some(completed_at);
    }

    /// Success when every item was processed, Partial otherwise
    ///
    /// Reporting more items than the record was opened with is rejected and
    /// leaves the record Pending.
    #[instrument(skip(self, report))]
    pub async fn complete(&self, record_id: RecordId, report: CompletionReport) -> Result<SyncRecord> {
        let mut record = self.load_pending(record_id).await?;
        if report.items_processed > record.items_total {
            return Err(TetherError::InvalidInput(format!(
                "sync record {record_id} reports {} of {} items processed",
                report.items_processed, record.items_total
            )));
        }
        record.items_processed = report.items_processed;
        record.metadata = report.metadata;
        record.status = if report.items_processed == record.items_total {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        Self::stamp(&mut record);
        self.repository.update_terminal(&record).await?;
        info!(
            status = %record.status,
            items_processed = record.items_processed,
            items_total = record.items_total,
            duration_ms = record.duration_ms,
            "sync record completed"
        );
        Ok(record)
    }

    /// Close a Pending record as Failed, keeping the error's code and message
    #[instrument(skip(self, err))]
    pub async fn fail(&self, record_id: RecordId, err: &TetherError) -> Result<SyncRecord> {
        let mut record = self.load_pending(record_id).await?;
        record.status = SyncStatus::Failed;
        record.error = Some(SyncErrorDetail::from(err));
        Self::stamp(&mut record);
        self.repository.update_terminal(&record).await?;
        warn!(code = %err.code(), error = %err, "sync record failed");
        Ok(record)
    }

    /// Begin a record, run `request` through `dispatcher`, then finish the
    /// record with the outcome
    ///
    /// Ledger errors fail the call; the operation's own error is returned in
    /// [`TrackedOperation::result`].
    pub async fn track(
        &self,
        owner_id: &str,
        request: OperationRequest,
        dispatcher: &dyn OperationDispatcher,
    ) -> Result<TrackedOperation> {
        let record = self.begin_with_payload(owner_id, &request).await?;
        self.run(record, request, dispatcher).await
    }

    async fn run(
        &self,
        record: SyncRecord,
        request: OperationRequest,
        dispatcher: &dyn OperationDispatcher,
    ) -> Result<TrackedOperation> {
        let result = dispatcher.dispatch(request).await;
        let record = match &result {
            Ok(output) => {
                let report = CompletionReport::new(output.items_processed())
                    .with_metadata(output.metadata());
                match self.complete(record.id, report).await {
                    Ok(record) => record,
                    // The record is still Pending; close it with the rejection.
                    Err(err @ TetherError::InvalidInput(_)) => {
                        let record = self.fail(record.id, &err).await?;
                        return Ok(TrackedOperation { record, result: Err(err) });
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => self.fail(record.id, err).await?,
        };
        Ok(TrackedOperation { record, result })
    }

    /// Replay a Failed record's payload as a new record linked by `retry_of`
    #[instrument(skip(self, dispatcher))]
    pub async fn retry(
        &self,
        record_id: RecordId,
        dispatcher: &dyn OperationDispatcher,
    ) -> Result<TrackedOperation> {
        let failed = self
            .repository
            .get(record_id)
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("sync record {record_id}")))?;
        if failed.status != SyncStatus::Failed {
            return Err(TetherError::InvalidState(format!(
                "only failed records can be retried, {record_id} is {}",
                failed.status
            )));
        }
        let Some(request) = failed.replay_request() else {
            return Err(TetherError::InvalidInput(format!(
                "sync record {record_id} has no stored payload to replay"
            )));
        };

        let mut record = SyncRecord::pending(
            failed.owner_id.clone(),
            failed.target_id.clone(),
            failed.kind,
            failed.items_total,
            Utc::now(),
        )
        .with_request(&request);
        record.retry_of = Some(record_id);
        self.repository.insert(&record).await?;
        info!(retry_record_id = %record.id, "retrying failed sync record");

        self.run(record, request, dispatcher).await
    }

    /// Fetch a record by id
    pub async fn get(&self, record_id: RecordId) -> Result<Option<SyncRecord>> {
        self.repository.get(record_id).await
    }

    /// Owner's records, newest first
    pub async fn history(&self, owner_id: &str, limit: usize) -> Result<Vec<SyncRecord>> {
        self.repository.history(owner_id, limit).await
    }

    /// Newest record for this owner and target
    pub async fn status_for(&self, owner_id: &str, target_id: &str) -> Result<Option<SyncRecord>> {
        self.repository.latest_for(owner_id, target_id).await
    }

    /// Failed records, newest first
    pub async fn failed_records(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        self.repository.find_by_status(SyncStatus::Failed, limit).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tether_domain::OperationPayload;

    use super::*;
    use crate::ledger::InMemorySyncRecordRepository;

    fn ledger() -> SyncLedger {
        SyncLedger::new(Arc::new(InMemorySyncRecordRepository::new()))
    }

    #[tokio::test]
    async fn partial_completion() {
        let ledger = ledger();
        let record = ledger.begin("owner-1", "booking", OperationKind::PushAvailability, 5).await.unwrap();
        assert_eq!(record.status, SyncStatus::Pending);

        let done = ledger
            .complete(record.id, CompletionReport::new(3).with_metadata(json!({"batch": 1})))
            .await
            .unwrap();
        assert_eq!(done.status, SyncStatus::Partial);
        assert_eq!(done.items_processed, 3);
        assert!(done.completed_at.is_some());
        assert!(done.duration_ms.is_some());
    }

    #[tokio::test]
    async fn full_completion_is_success() {
        let ledger = ledger();
        let record = ledger.begin("owner-1", "booking", OperationKind::PushMedia, 1).await.unwrap();
        let done = ledger.complete(record.id, CompletionReport::new(1)).await.unwrap();
        assert_eq!(done.status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn over_reported_completion_is_rejected() {
        let ledger = ledger();
        let record = ledger.begin("owner-1", "booking", OperationKind::PushAvailability, 5).await.unwrap();

        let err = ledger.complete(record.id, CompletionReport::new(6)).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidInput(_)));

        let stored = ledger.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Pending);
        assert_eq!(stored.items_processed, 0);

        let done = ledger.complete(record.id, CompletionReport::new(5)).await.unwrap();
        assert_eq!(done.status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn tracked_over_report_fails_the_record() {
        struct OverReporting;

        #[async_trait::async_trait]
        impl OperationDispatcher for OverReporting {
            async fn dispatch(&self, _request: OperationRequest) -> Result<OperationOutput> {
                Ok(OperationOutput::AvailabilityPushed { count: 6, external_ids: Vec::new() })
            }
        }

        let ledger = ledger();
        let items = (1..=5)
            .map(|d| tether_domain::AvailabilityItem {
                date: chrono::NaiveDate::from_ymd_opt(2026, 3, d).unwrap(),
                status: tether_domain::AvailabilityStatus::Available,
                note: None,
            })
            .collect();
        let request = OperationRequest::new("booking", OperationPayload::PushAvailability(items));

        let tracked = ledger.track("owner-1", request, &OverReporting).await.unwrap();
        assert!(matches!(tracked.result, Err(TetherError::InvalidInput(_))));
        assert_eq!(tracked.record.status, SyncStatus::Failed);
        assert_eq!(tracked.record.error.unwrap().code, tether_domain::ErrorCode::Validation);
    }

    #[tokio::test]
    async fn retry_replays_payload_and_timeout() {
        struct Recording(parking_lot::Mutex<Vec<OperationRequest>>);

        #[async_trait::async_trait]
        impl OperationDispatcher for Recording {
            async fn dispatch(&self, request: OperationRequest) -> Result<OperationOutput> {
                let first = self.0.lock().is_empty();
                self.0.lock().push(request);
                if first {
                    Err(TetherError::timeout("read_profile", std::time::Duration::from_millis(50)))
                } else {
                    Ok(OperationOutput::Authenticated)
                }
            }
        }

        let ledger = ledger();
        let dispatcher = Recording(parking_lot::Mutex::new(Vec::new()));
        let request = OperationRequest::new("booking", OperationPayload::ReadProfile)
            .with_timeout(std::time::Duration::from_millis(50));

        let failed = ledger.track("owner-1", request.clone(), &dispatcher).await.unwrap().record;
        assert_eq!(failed.timeout_ms, Some(50));
        let retried = ledger.retry(failed.id, &dispatcher).await.unwrap();

        assert_eq!(retried.record.timeout_ms, Some(50));
        assert_eq!(retried.record.retry_of, Some(failed.id));
        assert_eq!(*dispatcher.0.lock(), vec![request.clone(), request]);
    }

    #[tokio::test]
    async fn terminal_records_are_immutable() {
        let ledger = ledger();
        let record = ledger.begin("owner-1", "booking", OperationKind::ReadProfile, 1).await.unwrap();
        ledger.fail(record.id, &TetherError::Auth("bad password".into())).await.unwrap();

        let err = ledger.complete(record.id, CompletionReport::new(1)).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidState(_)));
        let err = ledger.fail(record.id, &TetherError::Internal("again".into())).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidState(_)));

        let stored = ledger.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.error.unwrap().message, "Authentication error: bad password");
    }

    #[tokio::test]
    async fn retry_requires_failed_record_with_payload() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl OperationDispatcher for Unreachable {
            async fn dispatch(&self, _request: OperationRequest) -> Result<OperationOutput> {
                unreachable!("dispatcher must not run")
            }
        }

        let ledger = ledger();
        let pending = ledger.begin("owner-1", "booking", OperationKind::ReadProfile, 1).await.unwrap();
        let err = ledger.retry(pending.id, &Unreachable).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidState(_)));

        ledger.fail(pending.id, &TetherError::Internal("boom".into())).await.unwrap();
        let err = ledger.retry(pending.id, &Unreachable).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidInput(_)));
    }
}
