//! Capped pool of reusable automation sessions
//!
//! All bookkeeping (entry states, waiter queue, reserved creation slots) lives
//! behind one mutex that is never held across an `.await`. Session I/O
//! (create, probe, close) happens outside the lock on entries that are already
//! reserved for the caller, so a resource is never granted twice.
//!
//! Waiting callers queue in FIFO order. A release hands the resource straight
//! to the oldest waiter through its oneshot channel; destroying a resource
//! hands the freed capacity to the oldest waiter as a creation slot.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_domain::{ExhaustionPolicy, PoolShutdownReport, PoolStats, Result, TetherError};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::lease::PooledSession;
use super::ports::{AutomationSession, SessionFactory};
use crate::config::PoolConfig;

/// Pool-assigned resource id, unique for the pool's lifetime
pub type ResourceId = u64;

/// Lifecycle state of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Warm and available for checkout
    Free,
    /// Leased to a caller
    InUse,
    /// Being torn down; no longer counted as available
    Closing,
}

/// Point-in-time view of one pooled resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledResource {
    /// Resource id
    pub id: ResourceId,
    /// Current state
    pub state: ResourceState,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last time the resource went back to Free
    pub last_released_at: Option<DateTime<Utc>>,
    /// When a Free resource will be closed if nobody takes it
    pub idle_deadline: Option<DateTime<Utc>>,
}

struct Entry {
    session: Arc<dyn AutomationSession>,
    state: ResourceState,
    created_at: DateTime<Utc>,
    last_released_at: Option<DateTime<Utc>>,
    idle_deadline: Option<DateTime<Utc>>,
    /// Bumped every time the entry becomes Free; idle timers carry the value
    /// they were armed with.
    generation: u64,
    /// Cancels the idle timer armed by the last release
    idle_timer: Option<CancellationToken>,
}

impl Entry {
    /// Leave Free: stop the pending eviction and forget its deadline
    fn disarm_idle_timer(&mut self) {
        self.idle_deadline = None;
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
    }
}

enum Grant {
    Resource(ResourceId),
    CreateSlot,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Grant>,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<ResourceId, Entry>,
    waiters: VecDeque<Waiter>,
    pending_creates: usize,
    accepting: bool,
    next_resource_id: ResourceId,
    next_waiter_id: u64,
    created_total: u64,
    destroyed_total: u64,
    released_during_grace: usize,
}

impl PoolState {
    /// Resources that exist or are being created
    fn live(&self) -> usize {
        self.entries.len() + self.pending_creates
    }

    fn count(&self, state: ResourceState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    /// Reserve the most recently released Free entry
    fn take_free(&mut self) -> Option<(ResourceId, Arc<dyn AutomationSession>)> {
        let id = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == ResourceState::Free)
            .max_by_key(|(id, e)| (e.last_released_at, **id))
            .map(|(id, _)| *id)?;
        let entry = self.entries.get_mut(&id)?;
        entry.state = ResourceState::InUse;
        entry.disarm_idle_timer();
        Some((id, Arc::clone(&entry.session)))
    }

    /// Give `grant` to the oldest waiter still listening. Returns it back when
    /// nobody took it.
    fn hand_off(&mut self, mut grant: Grant) -> Option<Grant> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Turn spare capacity into creation slots for queued callers
    fn offer_capacity(&mut self, max_resources: usize) {
        while self.accepting && !self.waiters.is_empty() && self.live() < max_resources {
            self.pending_creates += 1;
            if self.hand_off(Grant::CreateSlot).is_some() {
                self.pending_creates -= 1;
                break;
            }
        }
    }

    /// Mark an entry Closing and hand back its session, unless someone else
    /// is already closing it.
    fn begin_close(&mut self, id: ResourceId) -> Option<Arc<dyn AutomationSession>> {
        let entry = self.entries.get_mut(&id)?;
        if entry.state == ResourceState::Closing {
            return None;
        }
        entry.state = ResourceState::Closing;
        entry.disarm_idle_timer();
        Some(Arc::clone(&entry.session))
    }
}

pub(super) struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<PoolState>,
    /// Signalled whenever an in-use resource is released or destroyed
    drained: Notify,
    idle_timers: CancellationToken,
}

/// Outcome of waiting in the queue
enum WaitOutcome {
    Granted(Grant),
    TimedOut,
    Closed,
}

/// Queue position of a suspended `acquire`.
///
/// Dropping an unsettled ticket leaves the queue and passes on any grant that
/// arrived after the caller stopped listening.
struct WaitTicket {
    inner: Arc<PoolInner>,
    waiter_id: u64,
    rx: oneshot::Receiver<Grant>,
    settled: bool,
}

impl WaitTicket {
    async fn wait_until(mut self, deadline: Instant) -> WaitOutcome {
        let outcome = match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(grant)) => WaitOutcome::Granted(grant),
            Ok(Err(_)) => WaitOutcome::Closed,
            Err(_) => {
                // Under the lock no releaser can send between the two steps.
                let mut state = self.inner.state.lock();
                state.waiters.retain(|w| w.id != self.waiter_id);
                match self.rx.try_recv() {
                    Ok(grant) => WaitOutcome::Granted(grant),
                    Err(_) => WaitOutcome::TimedOut,
                }
            }
        };
        self.settled = true;
        outcome
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.inner.state.lock();
        state.waiters.retain(|w| w.id != self.waiter_id);
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.inner.return_grant(&mut state, grant);
        }
    }
}

/// A creation slot counted in `pending_creates`; given back if the create
/// future is dropped or fails.
struct SlotReservation {
    inner: Arc<PoolInner>,
    armed: bool,
}

impl SlotReservation {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        state.pending_creates = state.pending_creates.saturating_sub(1);
        state.offer_capacity(self.inner.config.max_resources);
    }
}

enum Step {
    Create { overflow: bool },
    Probe(ResourceId, Arc<dyn AutomationSession>),
    Wait(WaitTicket),
}

impl PoolInner {
    fn shutting_down() -> TetherError {
        TetherError::ShuttingDown("resource pool is shutting down".to_string())
    }

    fn next_step(self: &Arc<Self>) -> Result<Step> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(Self::shutting_down());
        }
        if state.live() < self.config.max_resources {
            state.pending_creates += 1;
            return Ok(Step::Create { overflow: false });
        }
        if let Some((id, session)) = state.take_free() {
            return Ok(Step::Probe(id, session));
        }
        let (tx, rx) = oneshot::channel();
        let waiter_id = state.next_waiter_id;
        state.next_waiter_id += 1;
        state.waiters.push_back(Waiter { id: waiter_id, tx });
        debug!(waiter_id, queued = state.waiters.len(), "waiting for a pooled resource");
        Ok(Step::Wait(WaitTicket { inner: Arc::clone(self), waiter_id, rx, settled: false }))
    }

    async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledSession> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match self.next_step()? {
                Step::Create { overflow } => return self.create(overflow).await,
                Step::Probe(id, session) => {
                    let lease = PooledSession::new(Arc::clone(self), id, session);
                    if let Some(lease) = self.probe(lease).await {
                        return Ok(lease);
                    }
                }
                Step::Wait(ticket) => match ticket.wait_until(deadline).await {
                    WaitOutcome::Granted(Grant::CreateSlot) => return self.create(false).await,
                    WaitOutcome::Granted(Grant::Resource(id)) => {
                        let session = self.state.lock().entries.get(&id).map(|e| Arc::clone(&e.session));
                        if let Some(session) = session {
                            let lease = PooledSession::new(Arc::clone(self), id, session);
                            if let Some(lease) = self.probe(lease).await {
                                return Ok(lease);
                            }
                        }
                    }
                    WaitOutcome::Closed => return Err(Self::shutting_down()),
                    WaitOutcome::TimedOut => return self.escape_valve(started.elapsed()).await,
                },
            }
        }
    }

    /// Wait ran out: create past the cap or fail, per policy
    async fn escape_valve(self: &Arc<Self>, waited: Duration) -> Result<PooledSession> {
        let overflow = {
            let mut state = self.state.lock();
            if !state.accepting {
                return Err(Self::shutting_down());
            }
            let overflow = state.live() >= self.config.max_resources;
            if overflow && self.config.on_exhausted == ExhaustionPolicy::Fail {
                warn!(
                    max_resources = self.config.max_resources,
                    waited_ms = waited.as_millis() as u64,
                    "resource pool exhausted"
                );
                return Err(TetherError::PoolExhausted {
                    max_resources: self.config.max_resources,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            state.pending_creates += 1;
            overflow
        };
        self.create(overflow).await
    }

    /// Create a session in a slot the caller already reserved
    async fn create(self: &Arc<Self>, overflow: bool) -> Result<PooledSession> {
        let reservation = SlotReservation { inner: Arc::clone(self), armed: true };
        let session = self.factory.create().await?;
        reservation.disarm();

        let id = {
            let mut state = self.state.lock();
            state.pending_creates = state.pending_creates.saturating_sub(1);
            if state.accepting {
                let id = state.next_resource_id;
                state.next_resource_id += 1;
                state.created_total += 1;
                state.entries.insert(
                    id,
                    Entry {
                        session: Arc::clone(&session),
                        state: ResourceState::InUse,
                        created_at: Utc::now(),
                        last_released_at: None,
                        idle_deadline: None,
                        generation: 0,
                        idle_timer: None,
                    },
                );
                if overflow {
                    warn!(
                        resource_id = id,
                        total = state.entries.len(),
                        max_resources = self.config.max_resources,
                        "created resource beyond pool cap"
                    );
                } else {
                    debug!(resource_id = id, total = state.entries.len(), "created resource");
                }
                Some(id)
            } else {
                None
            }
        };

        match id {
            Some(id) => Ok(PooledSession::new(Arc::clone(self), id, session)),
            None => {
                if let Err(err) = session.close().await {
                    warn!(error = %err, "failed to close session created during shutdown");
                }
                Err(Self::shutting_down())
            }
        }
    }

    /// Hand the lease out if its session still answers, destroy it otherwise
    async fn probe(self: &Arc<Self>, lease: PooledSession) -> Option<PooledSession> {
        if lease.is_alive().await {
            debug!(resource_id = lease.id(), "reusing pooled resource");
            return Some(lease);
        }
        warn!(resource_id = lease.id(), "pooled resource failed liveness probe, destroying");
        lease.discard().await;
        None
    }

    pub(super) async fn release(self: &Arc<Self>, id: ResourceId, session: Arc<dyn AutomationSession>) {
        let healthy = match session.close_transient().await {
            Ok(()) => true,
            Err(err) => {
                warn!(resource_id = id, error = %err, "closing transient handles failed");
                false
            }
        };

        let destroy = {
            let mut state = self.state.lock();
            match state.entries.get(&id).map(|e| e.state) {
                Some(ResourceState::InUse) => {}
                Some(other) => {
                    warn!(resource_id = id, state = ?other, "release of a resource that is not in use");
                    return;
                }
                None => {
                    debug!(resource_id = id, "released resource was already destroyed");
                    return;
                }
            }

            if !state.accepting {
                state.released_during_grace += 1;
                true
            } else if !healthy {
                true
            } else if state.hand_off(Grant::Resource(id)).is_none() {
                debug!(resource_id = id, "handed released resource to waiting caller");
                false
            } else if state.entries.len() > self.config.max_resources {
                debug!(resource_id = id, "shrinking pool back to cap");
                true
            } else {
                self.mark_free(&mut state, id);
                false
            }
        };

        if destroy {
            self.destroy(id).await;
        }
        self.drained.notify_waiters();
    }

    fn mark_free(self: &Arc<Self>, state: &mut PoolState, id: ResourceId) {
        let idle_timeout = self.config.idle_timeout;
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        let now = Utc::now();
        entry.state = ResourceState::Free;
        entry.last_released_at = Some(now);
        entry.idle_deadline =
            chrono::Duration::from_std(idle_timeout).ok().map(|idle| now + idle);
        entry.generation += 1;
        let generation = entry.generation;
        if let Some(timer) = self.arm_idle_timer(id, generation) {
            entry.idle_timer = Some(timer);
        }
    }

    /// Spawn the eviction task for one Free period; cancelled when the entry
    /// leaves Free or the pool shuts down.
    fn arm_idle_timer(self: &Arc<Self>, id: ResourceId, generation: u64) -> Option<CancellationToken> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(resource_id = id, "no runtime to arm idle timer");
            return None;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = self.idle_timers.child_token();
        let cancelled = timer.clone();
        let idle_timeout = self.config.idle_timeout;
        handle.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(idle_timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.evict_if_idle(id, generation).await;
                    }
                }
            }
        });
        Some(timer)
    }

    async fn evict_if_idle(self: &Arc<Self>, id: ResourceId, generation: u64) {
        let session = {
            let mut state = self.state.lock();
            match state.entries.get(&id) {
                Some(e) if e.state == ResourceState::Free && e.generation == generation => {}
                _ => return,
            }
            state.begin_close(id)
        };
        if let Some(session) = session {
            info!(resource_id = id, "evicting idle resource");
            self.finish_close(id, session).await;
        }
    }

    /// Give back a grant nobody consumed
    fn return_grant(self: &Arc<Self>, state: &mut PoolState, grant: Grant) {
        match grant {
            Grant::CreateSlot => {
                state.pending_creates = state.pending_creates.saturating_sub(1);
                state.offer_capacity(self.config.max_resources);
            }
            Grant::Resource(id) => {
                if let Some(grant) = state.hand_off(Grant::Resource(id)) {
                    drop(grant);
                    self.mark_free(state, id);
                }
            }
        }
    }

    pub(super) async fn destroy(self: &Arc<Self>, id: ResourceId) {
        let session = self.state.lock().begin_close(id);
        if let Some(session) = session {
            self.finish_close(id, session).await;
        }
    }

    async fn finish_close(self: &Arc<Self>, id: ResourceId, session: Arc<dyn AutomationSession>) {
        if let Err(err) = session.close().await {
            warn!(resource_id = id, error = %err, "closing session failed");
        }
        {
            let mut state = self.state.lock();
            if state.entries.remove(&id).is_some() {
                state.destroyed_total += 1;
            }
            state.offer_capacity(self.config.max_resources);
        }
        debug!(resource_id = id, "destroyed resource");
        self.drained.notify_waiters();
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            total: state.entries.len(),
            free: state.count(ResourceState::Free),
            in_use: state.count(ResourceState::InUse),
            closing: state.count(ResourceState::Closing),
            max_resources: self.config.max_resources,
            overflow: state.entries.len().saturating_sub(self.config.max_resources),
            created_total: state.created_total,
            destroyed_total: state.destroyed_total,
            waiters: state.waiters.len(),
        }
    }
}

/// Capped set of reusable automation sessions
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl ResourcePool {
    /// Build a pool. No sessions are created until the first `acquire`.
    pub fn new(config: PoolConfig, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        config.validate().map_err(TetherError::Config)?;
        let state = PoolState { accepting: true, next_resource_id: 1, ..PoolState::default() };
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(state),
                drained: Notify::new(),
                idle_timers: CancellationToken::new(),
            }),
        })
    }

    /// Validated configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a session, waiting at most `timeout` for one to free up.
    ///
    /// Under the cap a new session is created. At the cap a Free session is
    /// reused after a liveness probe (dead ones are destroyed and replaced).
    /// Otherwise the caller queues; when the wait runs out the configured
    /// [`ExhaustionPolicy`] decides between creating past the cap and failing.
    #[instrument(skip(self), fields(max_resources = self.inner.config.max_resources))]
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledSession> {
        self.inner.acquire(timeout).await
    }

    /// Return a session: transient handles are closed, then the session goes
    /// to the oldest waiter or back to Free with an idle-eviction timer.
    pub async fn release(&self, lease: PooledSession) {
        if !lease.belongs_to(&self.inner) {
            warn!(resource_id = lease.id(), "lease released to a pool that did not issue it");
        }
        lease.release().await;
    }

    /// Stop handing out sessions, wait up to `grace` for checked-out ones to
    /// come back, then destroy everything.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> PoolShutdownReport {
        let inner = &self.inner;
        let idle: Vec<_> = {
            let mut state = inner.state.lock();
            if !state.accepting {
                debug!("resource pool already shut down");
                return PoolShutdownReport::default();
            }
            state.accepting = false;
            // Dropping the senders wakes every waiter with `Closed`.
            state.waiters.clear();
            let free: Vec<_> = state
                .entries
                .iter()
                .filter(|(_, e)| e.state == ResourceState::Free)
                .map(|(id, _)| *id)
                .collect();
            free.into_iter().filter_map(|id| state.begin_close(id).map(|s| (id, s))).collect()
        };
        inner.idle_timers.cancel();

        let closed_idle = idle.len();
        for (id, session) in idle {
            inner.finish_close(id, session).await;
        }

        let deadline = Instant::now() + grace;
        loop {
            let notified = inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if inner.state.lock().count(ResourceState::InUse) == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let remaining: Vec<_> = {
            let mut state = inner.state.lock();
            let ids: Vec<_> = state
                .entries
                .iter()
                .filter(|(_, e)| e.state != ResourceState::Closing)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| state.begin_close(id).map(|s| (id, s))).collect()
        };
        let force_closed = remaining.len();
        for (id, session) in remaining {
            warn!(resource_id = id, "force-closing resource after shutdown grace period");
            inner.finish_close(id, session).await;
        }

        let report = PoolShutdownReport {
            closed_idle,
            released_during_grace: inner.state.lock().released_during_grace,
            force_closed,
        };
        info!(?report, "resource pool shut down");
        report
    }

    /// Current counts by state plus waiters
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Snapshot of every resource, ordered by id
    pub fn resources(&self) -> Vec<PooledResource> {
        let state = self.inner.state.lock();
        let mut resources: Vec<_> = state
            .entries
            .iter()
            .map(|(id, e)| PooledResource {
                id: *id,
                state: e.state,
                created_at: e.created_at,
                last_released_at: e.last_released_at,
                idle_deadline: e.idle_deadline,
            })
            .collect();
        resources.sort_by_key(|r| r.id);
        resources
    }

    /// False once shutdown has started
    pub fn is_accepting(&self) -> bool {
        self.inner.state.lock().accepting
    }
}
