//! In-memory ledger storage for tests and embedded use

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tether_domain::{RecordId, Result, SyncRecord, SyncStatus, TetherError};

use super::ports::SyncRecordRepository;

/// Process-local repository used by tests and embedders without a database
#[derive(Debug, Default)]
pub struct InMemorySyncRecordRepository {
    records: RwLock<HashMap<RecordId, SyncRecord>>,
}

impl InMemorySyncRecordRepository {
    /// Empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn select<F>(&self, limit: usize, filter: F) -> Vec<SyncRecord>
    where
        F: Fn(&SyncRecord) -> bool,
    {
        let records = self.records.read();
        let mut selected: Vec<_> = records.values().filter(|r| filter(r)).cloned().collect();
        // v7 ids are time ordered, so they break started_at ties.
        selected.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        selected.truncate(limit);
        selected
    }
}

#[async_trait]
impl SyncRecordRepository for InMemorySyncRecordRepository {
    async fn insert(&self, record: &SyncRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(TetherError::InvalidState(format!("sync record {} already exists", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_terminal(&self, record: &SyncRecord) -> Result<()> {
        let mut records = self.records.write();
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| TetherError::NotFound(format!("sync record {}", record.id)))?;
        if stored.status != SyncStatus::Pending {
            return Err(TetherError::InvalidState(format!(
                "sync record {} is already {}",
                record.id, stored.status
            )));
        }
        *stored = record.clone();
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<SyncRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn history(&self, owner_id: &str, limit: usize) -> Result<Vec<SyncRecord>> {
        Ok(self.select(limit, |r| r.owner_id == owner_id))
    }

    async fn latest_for(&self, owner_id: &str, target_id: &str) -> Result<Option<SyncRecord>> {
        Ok(self
            .select(1, |r| r.owner_id == owner_id && r.target_id == target_id)
            .into_iter()
            .next())
    }

    async fn find_by_status(&self, status: SyncStatus, limit: usize) -> Result<Vec<SyncRecord>> {
        Ok(self.select(limit, |r| r.status == status))
    }
}
