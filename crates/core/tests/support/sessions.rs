//! Mock automation sessions

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::{AutomationSession, SessionFactory};
use tether_domain::Result as DomainResult;

/// Session that counts how often it was probed and closed
#[derive(Debug)]
pub struct MockSession {
    pub id: usize,
    alive: AtomicBool,
    transient_closes: AtomicUsize,
    closes: AtomicUsize,
}

impl MockSession {
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn transient_closes(&self) -> usize {
        self.transient_closes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationSession for MockSession {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close_transient(&self) -> DomainResult<()> {
        self.transient_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> DomainResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that keeps every session it created for later inspection
#[derive(Debug, Default)]
pub struct MockSessionFactory {
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockSessionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock()[index].clone()
    }

    /// Sessions closed at least once
    pub fn closed(&self) -> usize {
        self.sessions.lock().iter().filter(|s| s.closes() > 0).count()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create(&self) -> DomainResult<Arc<dyn AutomationSession>> {
        let mut sessions = self.sessions.lock();
        let session = Arc::new(MockSession {
            id: sessions.len(),
            alive: AtomicBool::new(true),
            transient_closes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        sessions.push(session.clone());
        Ok(session)
    }
}
