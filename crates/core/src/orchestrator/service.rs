//! Operation orchestrator - admission, execution and lifecycle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tether_common::{RateLimiter, TokenBucketConfig};
use tether_domain::{
    ActiveOperation, BulkExecutionResult, BulkItemResult, OperationId, OperationKind,
    OperationOutput, OperationRequest, OperationState, OrchestratorStats, PoolShutdownReport,
    Result, TetherError,
};
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::events::OperationEvent;
use super::gate::{Admission, AdmissionGate};
use super::registry::{TargetRegistration, TargetRegistry};
use crate::adapter::{dispatch, PlatformAdapter};
use crate::config::OrchestratorConfig;
use crate::ledger::OperationDispatcher;
use crate::pool::{PooledSession, ResourcePool};

/// What `shutdown` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Operations still running when the grace period ran out
    pub abandoned_operations: usize,
    /// Queued operations rejected without running
    pub rejected_queued: usize,
    /// What the pool's own shutdown did
    pub pool: PoolShutdownReport,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Removes an operation from the active map however `execute_operation`
/// exits
struct ActiveEntry<'a> {
    active: &'a DashMap<OperationId, ActiveOperation>,
    finished: &'a Notify,
    operation_id: OperationId,
}

impl Drop for ActiveEntry<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.operation_id);
        self.finished.notify_waiters();
    }
}

/// Runs operations against registered targets
///
/// At most `max_concurrent_operations` run at once; the rest wait in strict
/// submission order. Each run consumes a rate-limit token for its target,
/// checks a session out of the pool when the adapter needs one, and races the
/// adapter call against the request's timeout (`operation_timeout` unless the
/// request sets its own). Whatever the outcome, the
/// adapter is cleaned up and the session released before the next queued
/// operation is admitted.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: TargetRegistry,
    pool: ResourcePool,
    limiter: Arc<RateLimiter>,
    gate: Arc<AdmissionGate>,
    active: DashMap<OperationId, ActiveOperation>,
    events: broadcast::Sender<OperationEvent>,
    counters: Counters,
    finished: Notify,
}

impl Orchestrator {
    /// Build an orchestrator over `pool` and `limiter`
    pub fn new(
        config: OrchestratorConfig,
        pool: ResourcePool,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        config.validate().map_err(TetherError::Config)?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            gate: AdmissionGate::new(config.max_concurrent_operations),
            config,
            registry: TargetRegistry::new(),
            pool,
            limiter,
            active: DashMap::new(),
            events,
            counters: Counters::default(),
            finished: Notify::new(),
        })
    }

    /// Validated configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The session pool shared by every target
    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Registered targets
    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Register (or replace) a target, applying its rate limit override
    pub fn register_target(&self, registration: TargetRegistration) -> Result<()> {
        let target_id = registration.target_id.clone();
        match registration.rate_limit {
            Some(bucket) => self
                .limiter
                .configure(&target_id, TokenBucketConfig::new(bucket.capacity, bucket.window()))?,
            None => self.limiter.remove(&target_id),
        }
        if self.registry.register(registration).is_some() {
            info!(target_id = %target_id, "replaced target registration");
        } else {
            info!(target_id = %target_id, "registered target");
        }
        Ok(())
    }

    /// Drop a target and its rate limit override. Returns whether it existed.
    pub fn unregister_target(&self, target_id: &str) -> bool {
        self.limiter.remove(target_id);
        let removed = self.registry.unregister(target_id).is_some();
        if removed {
            info!(target_id = %target_id, "unregistered target");
        }
        removed
    }

    /// Receive every operation state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: OperationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run one operation, waiting for a run slot if the cap is reached
    #[instrument(skip(self, request), fields(target_id = %request.target_id, kind = %request.kind()))]
    pub async fn execute_operation(&self, request: OperationRequest) -> Result<OperationOutput> {
        let registration = self.registry.get(&request.target_id)?;
        let kind = request.kind();
        let operation_id = Uuid::now_v7();
        let admission = self.gate.enter(operation_id)?;

        self.active.insert(
            operation_id,
            ActiveOperation {
                operation_id,
                target_id: request.target_id.clone(),
                kind,
                state: OperationState::Queued,
                enqueued_at: Utc::now(),
                started_at: None,
            },
        );
        let _entry =
            ActiveEntry { active: &self.active, finished: &self.finished, operation_id };

        let permit = match admission {
            Admission::Immediate(permit) => permit,
            Admission::Queued(queued) => {
                debug!(%operation_id, queue_depth = self.gate.queue_depth(), "operation queued");
                self.publish(OperationEvent::new(
                    operation_id,
                    &request.target_id,
                    kind,
                    OperationState::Queued,
                ));
                queued.wait().await?
            }
        };

        if let Some(mut op) = self.active.get_mut(&operation_id) {
            op.state = OperationState::Running;
            op.started_at = Some(Utc::now());
        }
        self.publish(OperationEvent::new(
            operation_id,
            &request.target_id,
            kind,
            OperationState::Running,
        ));

        let started = Instant::now();
        let result = self.run(&registration, kind, &request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let event =
            OperationEvent::new(operation_id, &request.target_id, kind, OperationState::Completed);
        match &result {
            Ok(_) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(%operation_id, elapsed_ms, "operation completed");
                self.publish(event);
            }
            Err(err @ TetherError::Timeout { .. }) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(%operation_id, elapsed_ms, "operation timed out");
                self.publish(
                    OperationEvent { state: OperationState::TimedOut, ..event }
                        .with_error(err.to_string()),
                );
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%operation_id, elapsed_ms, error = %err, "operation failed");
                self.publish(
                    OperationEvent { state: OperationState::Failed, ..event }
                        .with_error(err.to_string()),
                );
            }
        }

        // Admit the next queued operation only once this one is terminal.
        drop(permit);
        result
    }

    /// Timeout race plus unconditional cleanup and release
    async fn run(
        &self,
        registration: &TargetRegistration,
        kind: OperationKind,
        request: &OperationRequest,
    ) -> Result<OperationOutput> {
        let factory = &registration.adapter_factory;
        let mut lease: Option<PooledSession> = None;
        let mut adapter: Option<Box<dyn PlatformAdapter>> = None;

        let work = async {
            self.limiter.consume(&registration.target_id, 1).await?;
            if factory.requires_session(kind) {
                let acquired = self.pool.acquire(self.pool.config().acquire_timeout).await?;
                debug!(resource_id = acquired.id(), "session acquired");
                lease = Some(acquired);
            }
            let session = lease.as_ref().map(|l| Arc::clone(l.session()));
            let bound = adapter.insert(factory.create(&registration.credentials, session)?);
            dispatch(&**bound, &registration.credentials, &request.payload).await
        };

        let timeout = request.timeout().unwrap_or(self.config.operation_timeout);
        let result = match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::timeout(kind.as_str(), timeout)),
        };

        if let Some(adapter) = adapter {
            match tokio::time::timeout(self.config.cleanup_timeout, adapter.cleanup()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "adapter cleanup failed"),
                Err(_) => warn!(
                    cleanup_timeout_ms = self.config.cleanup_timeout.as_millis() as u64,
                    "adapter cleanup timed out"
                ),
            }
        }
        if let Some(lease) = lease {
            self.pool.release(lease).await;
        }
        result
    }

    /// Run every request concurrently and collect each outcome
    ///
    /// One failure never aborts the others; items come back in submission
    /// order.
    #[instrument(skip(self, requests), fields(requests = requests.len()))]
    pub async fn bulk_execute(&self, requests: Vec<OperationRequest>) -> BulkExecutionResult {
        let runs = requests.into_iter().enumerate().map(|(index, request)| async move {
            let target_id = request.target_id.clone();
            let kind = request.kind();
            let result = self.execute_operation(request).await;
            BulkItemResult { index, target_id, kind, result }
        });
        let result = BulkExecutionResult::from_items(join_all(runs).await);
        info!(succeeded = result.succeeded, failed = result.failed, "bulk execution finished");
        result
    }

    /// Admitted and queued operations, oldest first
    pub fn active_operations(&self) -> Vec<ActiveOperation> {
        let mut ops: Vec<_> = self.active.iter().map(|e| e.value().clone()).collect();
        ops.sort_by_key(|op| (op.enqueued_at, op.operation_id));
        ops
    }

    /// Counters and gauges for the orchestrator and its pool
    pub fn get_stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            registered_targets: self.registry.len(),
            active_operations: self.gate.running(),
            queue_depth: self.gate.queue_depth(),
            max_concurrent_operations: self.config.max_concurrent_operations,
            completed_total: self.counters.completed.load(Ordering::Relaxed),
            failed_total: self.counters.failed.load(Ordering::Relaxed),
            timed_out_total: self.counters.timed_out.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }

    /// False once shutdown has started
    pub fn is_accepting(&self) -> bool {
        self.gate.is_accepting()
    }

    /// Stop accepting operations, give running and queued ones up to `grace`
    /// to finish, reject whatever is still queued, then shut the pool down
    /// with the remaining time.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.gate.close();
        let deadline = Instant::now() + grace;
        info!(active = self.active.len(), "orchestrator shutting down");

        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let rejected_queued = self.gate.drain_queue();
        let abandoned_operations = self.gate.running();
        if abandoned_operations > 0 {
            warn!(abandoned_operations, "operations still running after grace period");
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let pool = self.pool.shutdown(remaining).await;
        let report = ShutdownReport { abandoned_operations, rejected_queued, pool };
        info!(?report, "orchestrator shut down");
        report
    }
}

#[async_trait]
impl OperationDispatcher for Orchestrator {
    async fn dispatch(&self, request: OperationRequest) -> Result<OperationOutput> {
        self.execute_operation(request).await
    }
}
