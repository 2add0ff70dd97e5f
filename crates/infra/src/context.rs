//! Composition root - wires storage, rate limiting, the pool, the
//! orchestrator and the ledger from one [`Config`]

use std::sync::Arc;
use std::time::Duration;

use tether_common::{RateLimiter, RetryConfig, RetryExecutor};
use tether_core::{
    rate_limiter_config, retry_config, Orchestrator, OrchestratorConfig, PoolConfig, ResourcePool,
    SessionFactory, ShutdownReport, SyncLedger, TargetRegistration, TrackedOperation,
};
use tether_domain::{
    BulkExecutionResult, Config, OperationOutput, OperationRequest, OrchestratorStats, RecordId,
    Result, SyncRecord,
};
use tracing::{info, instrument};

use crate::database::{DbManager, SqliteSyncRecordRepository};

/// Everything a host application needs to run and record operations
pub struct SyncContext {
    config: Config,
    db: Arc<DbManager>,
    orchestrator: Arc<Orchestrator>,
    ledger: SyncLedger,
    retry: RetryExecutor,
}

impl SyncContext {
    /// Build every component from `config`
    ///
    /// Opens (and migrates) the ledger database, so call this once at
    /// startup. Sessions for browser-driven targets come from
    /// `session_factory`.
    ///
    /// # Errors
    /// Returns `TetherError::Config` for invalid configuration and
    /// `TetherError::Database` if the ledger cannot be opened.
    #[instrument(skip_all, fields(db_path = %config.database.path))]
    pub fn init(config: Config, session_factory: Arc<dyn SessionFactory>) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;
        let ledger = SyncLedger::new(Arc::new(SqliteSyncRecordRepository::new(Arc::clone(&db))));

        let limiter = Arc::new(RateLimiter::new(rate_limiter_config(&config.rate_limits))?);
        let pool = ResourcePool::new(PoolConfig::from(&config.pool), session_factory)?;
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::from(&config.orchestrator),
            pool,
            limiter,
        )?);
        let retry = RetryExecutor::new(retry_config(&config.retry)?);

        info!(
            max_concurrent_operations = config.orchestrator.max_concurrent_operations,
            pool_max_resources = config.pool.max_resources,
            "sync context initialised"
        );
        Ok(Self { config, db, orchestrator, ledger, retry })
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Database manager backing the ledger
    pub fn db(&self) -> &Arc<DbManager> {
        &self.db
    }

    /// Shared orchestrator
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Ledger over the SQLite repository
    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Retry policy used by `execute_with_retry`
    pub fn retry_config(&self) -> &RetryConfig {
        self.retry.config()
    }

    /// Register a target with the orchestrator
    pub fn register_target(&self, registration: TargetRegistration) -> Result<()> {
        self.orchestrator.register_target(registration)
    }

    /// Run one operation without recording it
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationOutput> {
        self.orchestrator.execute_operation(request).await
    }

    /// Run one operation, re-submitting it after transient failures
    ///
    /// Each attempt goes back through admission, so retries respect the
    /// concurrency cap and the target's rate limit.
    pub async fn execute_with_retry(&self, request: OperationRequest) -> Result<OperationOutput> {
        let orchestrator = self.orchestrator.as_ref();
        self.retry.execute(|| orchestrator.execute_operation(request.clone())).await
    }

    /// Run a batch; see [`Orchestrator::bulk_execute`]
    pub async fn bulk_execute(&self, requests: Vec<OperationRequest>) -> BulkExecutionResult {
        self.orchestrator.bulk_execute(requests).await
    }

    /// Run one operation and record it in the ledger for `owner_id`
    pub async fn track(&self, owner_id: &str, request: OperationRequest) -> Result<TrackedOperation> {
        self.ledger.track(owner_id, request, self.orchestrator.as_ref()).await
    }

    /// Replay a failed ledger record as a new record
    pub async fn retry(&self, record_id: RecordId) -> Result<TrackedOperation> {
        self.ledger.retry(record_id, self.orchestrator.as_ref()).await
    }

    /// Owner's ledger records, newest first
    pub async fn history(&self, owner_id: &str, limit: usize) -> Result<Vec<SyncRecord>> {
        self.ledger.history(owner_id, limit).await
    }

    /// Orchestrator and pool stats
    pub fn stats(&self) -> OrchestratorStats {
        self.orchestrator.get_stats()
    }

    /// Shut down with the configured grace period
    pub async fn shutdown(&self) -> ShutdownReport {
        let grace = Duration::from_millis(self.config.orchestrator.shutdown_grace_ms);
        self.shutdown_with_grace(grace).await
    }

    /// Shut down, waiting at most `grace` for running operations
    pub async fn shutdown_with_grace(&self, grace: Duration) -> ShutdownReport {
        let report = self.orchestrator.shutdown(grace).await;
        info!(?report, "sync context shut down");
        report
    }
}
