//! Operation lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_domain::{OperationId, OperationKind, OperationState};

/// Published on every state transition of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    /// Operation the event belongs to
    pub operation_id: OperationId,
    /// Target the operation runs against
    pub target_id: String,
    /// What the operation does
    pub kind: OperationKind,
    /// State entered by this transition
    pub state: OperationState,
    /// When the transition happened
    pub at: DateTime<Utc>,
    /// Set for `Failed` and `TimedOut`
    pub error: Option<String>,
}

impl OperationEvent {
    pub(crate) fn new(
        operation_id: OperationId,
        target_id: &str,
        kind: OperationKind,
        state: OperationState,
    ) -> Self {
        Self {
            operation_id,
            target_id: target_id.to_string(),
            kind,
            state,
            at: Utc::now(),
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
