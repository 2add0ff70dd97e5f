//! Statistics and result summaries for the orchestration layer
//!
//! - Resource pool occupancy and lifetime counters
//! - Pool shutdown report
//! - Orchestrator snapshot
//! - Bulk execution results

use serde::{Deserialize, Serialize};

use super::operation::{OperationKind, OperationOutput};
use crate::errors::TetherError;

/* -------------------------------------------------------------------------- */
/* Resource Pool Statistics */
/* -------------------------------------------------------------------------- */

/// Resource pool occupancy
///
/// `total` counts every live resource, including those above the cap created
/// through the escape valve (reported separately as `overflow`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Live resources, overflow included
    pub total: usize,
    /// Warm and available
    pub free: usize,
    /// Leased out
    pub in_use: usize,
    /// Being torn down
    pub closing: usize,
    /// Configured cap
    pub max_resources: usize,
    /// Live resources beyond `max_resources`
    pub overflow: usize,
    /// Sessions created since startup
    pub created_total: u64,
    /// Sessions closed since startup
    pub destroyed_total: u64,
    /// Callers currently suspended in `acquire`
    pub waiters: usize,
}

/// What happened to each resource during pool shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolShutdownReport {
    /// Free resources closed immediately
    pub closed_idle: usize,
    /// In-use resources that came back within the grace period
    pub released_during_grace: usize,
    /// In-use resources destroyed after the grace period ran out
    pub force_closed: usize,
}

/* -------------------------------------------------------------------------- */
/* Orchestrator Statistics */
/* -------------------------------------------------------------------------- */

/// Orchestrator counters plus the pool's occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    /// Targets currently registered
    pub registered_targets: usize,
    /// Operations holding a run slot
    pub active_operations: usize,
    /// Operations waiting for a run slot
    pub queue_depth: usize,
    /// Configured run slot cap
    pub max_concurrent_operations: usize,
    /// Operations that finished successfully
    pub completed_total: u64,
    /// Operations that failed, timeouts excluded
    pub failed_total: u64,
    /// Operations cut off by their deadline
    pub timed_out_total: u64,
    /// Pool occupancy at the same instant
    pub pool: PoolStats,
}

/* -------------------------------------------------------------------------- */
/* Bulk Execution */
/* -------------------------------------------------------------------------- */

/// Outcome of one request in a bulk submission, in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    /// Position in the submitted batch
    pub index: usize,
    /// Target the request named
    pub target_id: String,
    /// Kind of the request
    pub kind: OperationKind,
    /// Output or error of this request
    pub result: Result<OperationOutput, TetherError>,
}

impl BulkItemResult {
    /// Whether this request succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Display text of the error, if it failed
    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(ToString::to_string)
    }
}

/// Per-item outcomes of a bulk submission plus tallies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkExecutionResult {
    /// Outcomes in submission order
    pub items: Vec<BulkItemResult>,
    /// Items that succeeded
    pub succeeded: usize,
    /// Items that failed
    pub failed: usize,
}

impl BulkExecutionResult {
    /// Aggregate per-item results, keeping their order
    pub fn from_items(items: Vec<BulkItemResult>) -> Self {
        let succeeded = items.iter().filter(|item| item.is_success()).count();
        let failed = items.len() - succeeded;
        Self { items, succeeded, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_counts_follow_items() {
        let items = vec![
            BulkItemResult {
                index: 0,
                target_id: "a".into(),
                kind: OperationKind::ReadProfile,
                result: Ok(OperationOutput::Authenticated),
            },
            BulkItemResult {
                index: 1,
                target_id: "b".into(),
                kind: OperationKind::ReadProfile,
                result: Err(TetherError::Auth("denied".into())),
            },
        ];

        let summary = BulkExecutionResult::from_items(items);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.items[1].error_message().as_deref(),
            Some("Authentication error: denied")
        );
    }
}
