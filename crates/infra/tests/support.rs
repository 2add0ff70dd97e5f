//! Shared fixtures for infra integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tether_core::{AdapterFactory, AutomationSession, PlatformAdapter, SessionFactory};
use tether_domain::{
    AvailabilityItem, Config, Credentials, MediaDescriptor, NetworkErrorKind, ProfileSnapshot,
    ProfileUpdate, Result as DomainResult, TetherError,
};

/// Config pointing the ledger at a file inside `dir`, with short retry
/// delays so retry tests run in real time.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("ledger.db").to_string_lossy().into_owned();
    config.database.pool_size = 2;
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 40;
    config.orchestrator.shutdown_grace_ms = 1_000;
    config
}

pub struct StubSession;

#[async_trait]
impl AutomationSession for StubSession {
    async fn is_alive(&self) -> bool {
        true
    }

    async fn close_transient(&self) -> DomainResult<()> {
        Ok(())
    }

    async fn close(&self) -> DomainResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct StubSessionFactory {
    created: AtomicUsize,
}

impl StubSessionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for StubSessionFactory {
    async fn create(&self) -> DomainResult<Arc<dyn AutomationSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubSession))
    }
}

/// Adapters that fail their first `failures` calls with `error`, then succeed
pub struct FlakyAdapterFactory {
    failures: AtomicUsize,
    error: TetherError,
    calls: Arc<AtomicUsize>,
}

impl FlakyAdapterFactory {
    pub fn new(failures: usize, error: TetherError) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            error,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Reliable adapters
    pub fn healthy() -> Arc<Self> {
        Self::new(0, TetherError::network(NetworkErrorKind::ConnectionReset, "unused"))
    }

    /// Transport resets, which the retry policy treats as transient
    pub fn resetting(failures: usize) -> Arc<Self> {
        Self::new(failures, TetherError::network(NetworkErrorKind::ConnectionReset, "reset"))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `failures` calls fail again
    pub fn fail_next(&self, failures: usize) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    fn outcome(&self) -> DomainResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }
}

impl AdapterFactory for FlakyAdapterFactory {
    fn create(
        &self,
        _credentials: &Credentials,
        _session: Option<Arc<dyn AutomationSession>>,
    ) -> DomainResult<Box<dyn PlatformAdapter>> {
        // Each call decides its outcome up front from the shared counter.
        Ok(Box::new(FlakyAdapter { outcome: self.outcome() }))
    }
}

struct FlakyAdapter {
    outcome: DomainResult<()>,
}

#[async_trait]
impl PlatformAdapter for FlakyAdapter {
    async fn authenticate(&self, _credentials: &Credentials) -> DomainResult<()> {
        self.outcome.clone()
    }

    async fn push_availability(
        &self,
        items: &[AvailabilityItem],
    ) -> DomainResult<(u32, Vec<String>)> {
        self.outcome.clone()?;
        let ids = items.iter().map(|item| format!("slot-{}", item.date)).collect();
        Ok((items.len() as u32, ids))
    }

    async fn push_media(&self, media: &MediaDescriptor) -> DomainResult<(String, String)> {
        self.outcome.clone()?;
        Ok((format!("media-{}", media.file_name), format!("https://cdn.example.test/{}", media.file_name)))
    }

    async fn update_profile(&self, profile: &ProfileUpdate) -> DomainResult<Vec<String>> {
        self.outcome.clone()?;
        Ok(profile.fields.keys().cloned().collect())
    }

    async fn read_profile(&self) -> DomainResult<ProfileSnapshot> {
        self.outcome.clone()?;
        Ok(ProfileSnapshot { fields: Default::default(), captured_at: Utc::now() })
    }

    async fn cleanup(&self) -> DomainResult<()> {
        Ok(())
    }
}
