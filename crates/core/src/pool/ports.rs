//! Port interfaces for pooled automation sessions

use std::sync::Arc;

use async_trait::async_trait;
use tether_domain::Result;

/// A heavyweight, reusable automation handle (e.g. a headless browser)
#[async_trait]
pub trait AutomationSession: Send + Sync {
    /// Cheap liveness probe run before a pooled session is handed out again
    async fn is_alive(&self) -> bool;

    /// Close secondary handles (extra tabs/pages) opened during an operation
    async fn close_transient(&self) -> Result<()>;

    /// Tear the session down for good
    async fn close(&self) -> Result<()>;
}

/// Creates new sessions for the pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session. Called with no pool lock held.
    async fn create(&self) -> Result<Arc<dyn AutomationSession>>;
}
