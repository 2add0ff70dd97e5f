//! Port interfaces for the sync ledger

use async_trait::async_trait;
use tether_domain::{OperationOutput, OperationRequest, RecordId, Result, SyncRecord, SyncStatus};

/// Durable storage for sync records
#[async_trait]
pub trait SyncRecordRepository: Send + Sync {
    /// Store a new Pending record
    async fn insert(&self, record: &SyncRecord) -> Result<()>;

    /// Persist a Pending to terminal transition.
    ///
    /// Fails with `TetherError::InvalidState` if the stored record is no
    /// longer Pending, so concurrent writers cannot both finish a record.
    async fn update_terminal(&self, record: &SyncRecord) -> Result<()>;

    /// Fetch a record by id
    async fn get(&self, id: RecordId) -> Result<Option<SyncRecord>>;

    /// Owner's records, newest first
    async fn history(&self, owner_id: &str, limit: usize) -> Result<Vec<SyncRecord>>;

    /// Newest record for an owner/target pair
    async fn latest_for(&self, owner_id: &str, target_id: &str) -> Result<Option<SyncRecord>>;

    /// Records in `status`, newest first
    async fn find_by_status(&self, status: SyncStatus, limit: usize) -> Result<Vec<SyncRecord>>;
}

/// Anything that can run an operation request to completion
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    /// Run `request`, returning its output or the failure
    async fn dispatch(&self, request: OperationRequest) -> Result<OperationOutput>;
}
