//! Exclusive handle to a pooled session

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::ports::AutomationSession;
use super::service::{PoolInner, ResourceId};

/// A session checked out of a [`ResourcePool`](super::ResourcePool)
///
/// Give it back with [`ResourcePool::release`](super::ResourcePool::release).
/// A lease dropped without release (for instance because the owning future
/// was cancelled) is released on the current runtime in the background.
pub struct PooledSession {
    inner: Arc<PoolInner>,
    id: ResourceId,
    session: Arc<dyn AutomationSession>,
    settled: bool,
}

impl PooledSession {
    pub(super) fn new(
        inner: Arc<PoolInner>,
        id: ResourceId,
        session: Arc<dyn AutomationSession>,
    ) -> Self {
        Self { inner, id, session, settled: false }
    }

    /// Id of the pooled resource behind this lease
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The leased session
    pub fn session(&self) -> &Arc<dyn AutomationSession> {
        &self.session
    }

    pub(super) fn belongs_to(&self, inner: &Arc<PoolInner>) -> bool {
        Arc::ptr_eq(&self.inner, inner)
    }

    /// Return the session to its pool
    pub(super) async fn release(mut self) {
        self.settled = true;
        let session = Arc::clone(&self.session);
        self.inner.release(self.id, session).await;
    }

    /// Destroy the session instead of returning it
    pub(super) async fn discard(mut self) {
        self.settled = true;
        self.inner.destroy(self.id).await;
    }
}

impl Deref for PooledSession {
    type Target = dyn AutomationSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(&self.session);
        let id = self.id;
        match Handle::try_current() {
            Ok(handle) => {
                debug!(resource_id = id, "lease dropped without release, releasing in background");
                handle.spawn(async move { inner.release(id, session).await });
            }
            Err(_) => {
                warn!(resource_id = id, "lease dropped outside a runtime, resource stays in use");
            }
        }
    }
}
