//! SQLite-backed implementation of the sync ledger port.
//!
//! The Pending → terminal transition is guarded in SQL
//! (`WHERE status = 'pending'`), so two writers racing to finish the same
//! record cannot both succeed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, ToSql};
use tether_core::SyncRecordRepository;
use tether_domain::{
    ErrorCode, OperationKind, OperationPayload, RecordId, Result as DomainResult,
    SyncErrorDetail, SyncRecord, SyncStatus, TetherError,
};
use tokio::task;
use tracing::{debug, warn};
use uuid::Uuid;

use super::manager::{map_sql_error, DbManager, SqliteConnection};

/// SQLite ledger repository.
pub struct SqliteSyncRecordRepository {
    db: Arc<DbManager>,
}

impl SqliteSyncRecordRepository {
    /// Construct a repository over a migrated database.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    fn insert_record(conn: &SqliteConnection, record: &SyncRecord) -> DomainResult<()> {
        let (error_code, error_message) = match &record.error {
            Some(detail) => (Some(detail.code.as_str()), Some(detail.message.as_str())),
            None => (None, None),
        };
        let metadata = record.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let payload = record.payload.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            INSERT_SQL,
            params![
                record.id.to_string(),
                record.owner_id,
                record.target_id,
                record.kind.as_str(),
                record.status.as_str(),
                record.items_total,
                record.items_processed,
                format_timestamp(&record.started_at),
                record.completed_at.as_ref().map(format_timestamp),
                record.duration_ms,
                error_code,
                error_message,
                metadata,
                payload,
                record.retry_of.map(|id| id.to_string()),
                record.timeout_ms.map(u64_to_i64),
            ],
        )
        .map_err(map_sql_error)?;
        Ok(())
    }

    fn finish_record(conn: &SqliteConnection, record: &SyncRecord) -> DomainResult<()> {
        if !record.status.is_terminal() {
            return Err(TetherError::InvalidInput(format!(
                "sync record {} must move to a terminal status",
                record.id
            )));
        }
        let id = record.id.to_string();
        let (error_code, error_message) = match &record.error {
            Some(detail) => (Some(detail.code.as_str()), Some(detail.message.as_str())),
            None => (None, None),
        };
        let metadata = record.metadata.as_ref().map(serde_json::to_string).transpose()?;

        let changed = conn
            .execute(
                FINISH_SQL,
                params![
                    id,
                    record.status.as_str(),
                    record.items_processed,
                    record.completed_at.as_ref().map(format_timestamp),
                    record.duration_ms,
                    error_code,
                    error_message,
                    metadata,
                ],
            )
            .map_err(map_sql_error)?;
        if changed == 1 {
            return Ok(());
        }

        let current: Option<String> = conn
            .query_row("SELECT status FROM sync_records WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(map_sql_error)?;
        match current {
            None => Err(TetherError::NotFound(format!("sync record {}", record.id))),
            Some(status) => Err(TetherError::InvalidState(format!(
                "sync record {} is already {status}",
                record.id
            ))),
        }
    }

    fn select(
        conn: &SqliteConnection,
        filter: &str,
        params: &[&dyn ToSql],
    ) -> DomainResult<Vec<SyncRecord>> {
        let sql = format!("{SELECT_SQL} WHERE {filter} ORDER BY started_at DESC, id DESC LIMIT ?");
        let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
        let rows = stmt.query_map(params, map_record_row).map_err(map_sql_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_connection<T, F>(&self, f: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteConnection) -> DomainResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<T> {
            let conn = db.get_connection()?;
            f(&conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl SyncRecordRepository for SqliteSyncRecordRepository {
    async fn insert(&self, record: &SyncRecord) -> DomainResult<()> {
        let record_id = record.id;
        let record = record.clone();
        self.with_connection(move |conn| Self::insert_record(conn, &record)).await?;
        debug!(record_id = %record_id, "sync record inserted");
        Ok(())
    }

    async fn update_terminal(&self, record: &SyncRecord) -> DomainResult<()> {
        let record = record.clone();
        self.with_connection(move |conn| Self::finish_record(conn, &record)).await
    }

    async fn get(&self, id: RecordId) -> DomainResult<Option<SyncRecord>> {
        self.with_connection(move |conn| {
            conn.query_row(
                &format!("{SELECT_SQL} WHERE id = ?1"),
                params![id.to_string()],
                map_record_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }

    async fn history(&self, owner_id: &str, limit: usize) -> DomainResult<Vec<SyncRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let owner_id = owner_id.to_string();
        self.with_connection(move |conn| {
            let limit = usize_to_i64(limit);
            Self::select(conn, "owner_id = ?", &[&owner_id, &limit])
        })
        .await
    }

    async fn latest_for(
        &self,
        owner_id: &str,
        target_id: &str,
    ) -> DomainResult<Option<SyncRecord>> {
        let owner_id = owner_id.to_string();
        let target_id = target_id.to_string();
        self.with_connection(move |conn| {
            let mut records =
                Self::select(conn, "owner_id = ? AND target_id = ?", &[&owner_id, &target_id, &1_i64])?;
            Ok(records.pop())
        })
        .await
    }

    async fn find_by_status(
        &self,
        status: SyncStatus,
        limit: usize,
    ) -> DomainResult<Vec<SyncRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.with_connection(move |conn| {
            let limit = usize_to_i64(limit);
            Self::select(conn, "status = ?", &[&status.as_str(), &limit])
        })
        .await
    }
}

const INSERT_SQL: &str = "INSERT INTO sync_records (
        id, owner_id, target_id, kind, status, items_total, items_processed, started_at,
        completed_at, duration_ms, error_code, error_message, metadata_json, payload_json, retry_of,
        timeout_ms
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

const FINISH_SQL: &str = "UPDATE sync_records SET
        status = ?2, items_processed = ?3, completed_at = ?4, duration_ms = ?5,
        error_code = ?6, error_message = ?7, metadata_json = ?8
    WHERE id = ?1 AND status = 'pending'";

const SELECT_SQL: &str = "SELECT
        id, owner_id, target_id, kind, status, items_total, items_processed, started_at,
        completed_at, duration_ms, error_code, error_message, metadata_json, payload_json, retry_of,
        timeout_ms
    FROM sync_records";

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    let id = parse_uuid(0, &row.get::<_, String>(0)?)?;
    let kind = row
        .get::<_, String>(3)?
        .parse::<OperationKind>()
        .map_err(|e| conversion_error(3, e))?;
    let status =
        row.get::<_, String>(4)?.parse::<SyncStatus>().map_err(|e| conversion_error(4, e))?;

    let error_code: Option<String> = row.get(10)?;
    let error_message: Option<String> = row.get(11)?;
    let error = match (error_code, error_message) {
        (Some(code), message) => Some(SyncErrorDetail {
            code: parse_error_code(&id, &code),
            message: message.unwrap_or_default(),
        }),
        (None, Some(message)) => Some(SyncErrorDetail { code: ErrorCode::Internal, message }),
        (None, None) => None,
    };

    let metadata = row
        .get::<_, Option<String>>(12)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| conversion_error(12, e))?;
    let payload = row
        .get::<_, Option<String>>(13)?
        .map(|raw| serde_json::from_str::<OperationPayload>(&raw))
        .transpose()
        .map_err(|e| conversion_error(13, e))?;
    let retry_of =
        row.get::<_, Option<String>>(14)?.map(|raw| parse_uuid(14, &raw)).transpose()?;
    let timeout_ms = row
        .get::<_, Option<i64>>(15)?
        .map(|raw| {
            u64::try_from(raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(15, Type::Integer, Box::new(e)))
        })
        .transpose()?;

    Ok(SyncRecord {
        id,
        owner_id: row.get(1)?,
        target_id: row.get(2)?,
        kind,
        status,
        items_total: row.get(5)?,
        items_processed: row.get(6)?,
        started_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        completed_at: row
            .get::<_, Option<String>>(8)?
            .map(|raw| parse_timestamp(8, &raw))
            .transpose()?,
        duration_ms: row.get(9)?,
        error,
        metadata,
        payload,
        timeout_ms,
        retry_of,
    })
}

fn parse_error_code(id: &Uuid, raw: &str) -> ErrorCode {
    match raw.parse::<ErrorCode>() {
        Ok(code) => code,
        Err(err) => {
            warn!(
                record_id = %id,
                raw_code = %raw,
                error = %err,
                "unknown error code stored in sync_records, reading as internal"
            );
            ErrorCode::Internal
        }
    }
}

/// Fixed nanosecond precision keeps text order equal to time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| conversion_error(idx, e))
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn map_join_error(err: task::JoinError) -> TetherError {
    if err.is_cancelled() {
        TetherError::Internal("ledger task cancelled".into())
    } else {
        TetherError::Internal(format!("ledger task panic: {err}"))
    }
}

fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
