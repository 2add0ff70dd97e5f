//! Operations dispatched against a target platform

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::impl_domain_status_conversions;

/// Unique id of one dispatched operation (UUIDv7, time-ordered)
pub type OperationId = Uuid;

/// The closed set of things an adapter can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Log in to the target
    Authenticate,
    /// Publish calendar availability
    PushAvailability,
    /// Upload a media file
    PushMedia,
    /// Write profile fields
    UpdateProfile,
    /// Read the published profile
    ReadProfile,
}

impl_domain_status_conversions!(OperationKind {
    Authenticate => "authenticate",
    PushAvailability => "push_availability",
    PushMedia => "push_media",
    UpdateProfile => "update_profile",
    ReadProfile => "read_profile",
});

/// Availability state for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    /// Open for bookings
    Available,
    /// Blocked out
    Unavailable,
    /// Held but not confirmed
    Tentative,
}

/// One day of availability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityItem {
    /// Calendar day
    pub date: NaiveDate,
    /// State for that day
    pub status: AvailabilityStatus,
    /// Free text shown on the target, where supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Where a media file lives and how to label it on the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Name to upload under
    pub file_name: String,
    /// MIME type
    pub content_type: String,
    /// Local path or URL the adapter reads the bytes from
    pub source: String,
    /// Label shown next to the media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Profile fields to write, keyed by the owning application's field names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    /// Field name to new value
    pub fields: BTreeMap<String, Value>,
}

/// Profile as currently shown on the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// Field name to current value
    pub fields: BTreeMap<String, Value>,
    /// When the adapter read the profile
    pub captured_at: DateTime<Utc>,
}

/// Input of an operation. The variant determines the [`OperationKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OperationPayload {
    /// No input
    Authenticate,
    /// Days to publish
    PushAvailability(Vec<AvailabilityItem>),
    /// File to upload
    PushMedia(MediaDescriptor),
    /// Fields to write
    UpdateProfile(ProfileUpdate),
    /// No input
    ReadProfile,
}

impl OperationPayload {
    /// Kind this payload runs as
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Authenticate => OperationKind::Authenticate,
            Self::PushAvailability(_) => OperationKind::PushAvailability,
            Self::PushMedia(_) => OperationKind::PushMedia,
            Self::UpdateProfile(_) => OperationKind::UpdateProfile,
            Self::ReadProfile => OperationKind::ReadProfile,
        }
    }

    /// Number of items a ledger record expects this payload to process
    pub fn items_total(&self) -> u32 {
        match self {
            Self::PushAvailability(items) => u32::try_from(items.len()).unwrap_or(u32::MAX),
            _ => 1,
        }
    }
}

/// Adapter result, one variant per [`OperationKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OperationOutput {
    /// Login succeeded
    Authenticated,
    /// Days accepted and their ids on the target
    AvailabilityPushed {
        /// Days the target accepted
        count: u32,
        /// Target-side ids of the accepted days
        external_ids: Vec<String>,
    },
    /// Id and public URL of the uploaded file
    MediaPushed {
        /// Target-side id of the file
        external_id: String,
        /// Public URL of the file
        url: String,
    },
    /// Fields the target accepted
    ProfileUpdated {
        /// Names of the fields the target accepted
        updated_fields: Vec<String>,
    },
    /// Profile as read
    Profile(ProfileSnapshot),
}

impl OperationOutput {
    /// Items the adapter reports as processed
    pub fn items_processed(&self) -> u32 {
        match self {
            Self::AvailabilityPushed { count, .. } => *count,
            _ => 1,
        }
    }

    /// Result details worth keeping on a ledger record
    pub fn metadata(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A caller's request to run one operation against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Registered target to run against
    pub target_id: String,
    /// What to do
    pub payload: OperationPayload,
    /// Per-operation timeout; the orchestrator's default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl OperationRequest {
    /// Request using the orchestrator's default timeout
    pub fn new(target_id: impl Into<String>, payload: OperationPayload) -> Self {
        Self { target_id: target_id.into(), payload, timeout_ms: None }
    }

    /// Override the orchestrator's operation timeout for this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Kind of the payload
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Requested timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Lifecycle of an operation inside the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Waiting for a run slot
    Queued,
    /// Holding a run slot: covers the rate-limit wait, session checkout and
    /// the adapter call
    Running,
    /// Adapter call returned successfully
    Completed,
    /// Adapter call or setup returned an error
    Failed,
    /// Deadline elapsed first
    TimedOut,
}

impl_domain_status_conversions!(OperationState {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    TimedOut => "timed_out",
});

impl OperationState {
    /// Completed, Failed or TimedOut
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Snapshot of one admitted, not yet finished operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveOperation {
    /// Id assigned at submission
    pub operation_id: OperationId,
    /// Target the operation runs against
    pub target_id: String,
    /// What the operation does
    pub kind: OperationKind,
    /// `Running` once the operation holds a run slot, before any session is
    /// checked out
    pub state: OperationState,
    /// When the operation was submitted
    pub enqueued_at: DateTime<Utc>,
    /// When the run slot was granted
    pub started_at: Option<DateTime<Utc>>,
}
