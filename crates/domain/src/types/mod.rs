//! Domain types and models

pub mod credentials;
pub mod ledger;
pub mod operation;
pub mod stats;

pub use credentials::{Credentials, Secret};
pub use ledger::{CompletionReport, ErrorCode, RecordId, SyncErrorDetail, SyncRecord, SyncStatus};
pub use operation::{
    ActiveOperation, AvailabilityItem, AvailabilityStatus, MediaDescriptor, OperationId,
    OperationKind, OperationOutput, OperationPayload, OperationRequest, OperationState,
    ProfileSnapshot, ProfileUpdate,
};
pub use stats::{
    BulkExecutionResult, BulkItemResult, OrchestratorStats, PoolShutdownReport, PoolStats,
};
