//! Sync ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::operation::{OperationKind, OperationPayload, OperationRequest};
use crate::errors::TetherError;
use crate::impl_domain_status_conversions;

/// Unique id of a ledger record (UUIDv7)
pub type RecordId = Uuid;

/// Ledger record status. Pending moves once to one of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Operation still in flight
    Pending,
    /// Every item processed
    Success,
    /// Operation returned an error
    Failed,
    /// Finished with fewer items than expected
    Partial,
}

impl_domain_status_conversions!(SyncStatus {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
    Partial => "partial",
});

impl SyncStatus {
    /// Anything but Pending
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Stable failure category stored with a failed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Deadline elapsed
    Timeout,
    /// Network or 5xx failure that may succeed later
    Transient,
    /// Credentials rejected
    Authentication,
    /// Bad input or a 4xx the caller must fix
    Validation,
    /// Unknown target or record
    NotFound,
    /// Local bucket or upstream 429
    RateLimited,
    /// Session pool failure
    Pool,
    /// Rejected during shutdown
    Shutdown,
    /// Adapter failure
    Adapter,
    /// Bug or invalid state transition
    Internal,
    /// Ledger storage failure
    Storage,
    /// Configuration problem
    Config,
}

impl_domain_status_conversions!(ErrorCode {
    Timeout => "timeout",
    Transient => "transient",
    Authentication => "authentication",
    Validation => "validation",
    NotFound => "not_found",
    RateLimited => "rate_limited",
    Pool => "pool",
    Shutdown => "shutdown",
    Adapter => "adapter",
    Internal => "internal",
    Storage => "storage",
    Config => "config",
});

/// Why a record failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorDetail {
    /// Error display text
    pub message: String,
    /// Category for filtering and alerting
    pub code: ErrorCode,
}

impl From<&TetherError> for SyncErrorDetail {
    fn from(err: &TetherError) -> Self {
        Self { message: err.to_string(), code: err.code() }
    }
}

/// Durable record of one attempted operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// UUIDv7, so ids sort by creation time
    pub id: RecordId,
    /// Who the operation was run for
    pub owner_id: String,
    /// Target the operation ran against
    pub target_id: String,
    /// What the operation did
    pub kind: OperationKind,
    /// Current status
    pub status: SyncStatus,
    /// Items the payload asked for
    pub items_total: u32,
    /// Items the adapter reported done
    pub items_processed: u32,
    /// When the record was opened
    pub started_at: DateTime<Utc>,
    /// Set once the record is terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at` in milliseconds
    pub duration_ms: Option<i64>,
    /// Set when Failed
    pub error: Option<SyncErrorDetail>,
    /// Output details from a successful run
    pub metadata: Option<Value>,
    /// Input kept for replay; `None` when the caller did not supply one
    pub payload: Option<OperationPayload>,
    /// Timeout the original request asked for, replayed with the payload
    pub timeout_ms: Option<u64>,
    /// Failed record this one re-runs
    pub retry_of: Option<RecordId>,
}

impl SyncRecord {
    /// New pending record stamped with `started_at`
    pub fn pending(
        owner_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: OperationKind,
        items_total: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id: owner_id.into(),
            target_id: target_id.into(),
            kind,
            status: SyncStatus::Pending,
            items_total,
            items_processed: 0,
            started_at,
            completed_at: None,
            duration_ms: None,
            error: None,
            metadata: None,
            payload: None,
            timeout_ms: None,
            retry_of: None,
        }
    }

    /// Keep `payload` for replay
    pub fn with_payload(mut self, payload: OperationPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Keep everything needed to replay `request`
    pub fn with_request(mut self, request: &OperationRequest) -> Self {
        self.payload = Some(request.payload.clone());
        self.timeout_ms = request.timeout_ms;
        self
    }

    /// The request this record would re-run, if it kept its payload
    pub fn replay_request(&self) -> Option<OperationRequest> {
        let payload = self.payload.clone()?;
        Some(OperationRequest {
            target_id: self.target_id.clone(),
            payload,
            timeout_ms: self.timeout_ms,
        })
    }

    /// Whether the record has left Pending
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only failed records that kept their payload can be replayed
    pub fn is_retryable(&self) -> bool {
        self.status == SyncStatus::Failed && self.payload.is_some()
    }
}

/// What an operation reports when it finishes without error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Items the operation finished
    pub items_processed: u32,
    /// Stored on the record as-is
    pub metadata: Option<Value>,
}

impl CompletionReport {
    /// Report with no metadata
    pub fn new(items_processed: u32) -> Self {
        Self { items_processed, metadata: None }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
