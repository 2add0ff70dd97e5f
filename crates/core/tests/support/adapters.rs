//! Mock platform adapters

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tether_core::{AdapterFactory, AutomationSession, PlatformAdapter};
use tether_domain::{
    AvailabilityItem, Credentials, MediaDescriptor, OperationKind, ProfileSnapshot, ProfileUpdate,
    Result as DomainResult, TetherError,
};

/// How adapters built for one principal behave
#[derive(Debug, Clone, Default)]
pub struct AdapterBehaviour {
    /// Simulated work per call
    pub delay: Duration,
    /// Returned instead of a result, after the delay
    pub failure: Option<TetherError>,
}

#[derive(Default)]
struct Shared {
    /// Calls in start order, as `"<target>:<kind>"`
    calls: Mutex<Vec<String>>,
    /// Sessions currently driven by an adapter call
    holders: Mutex<HashSet<usize>>,
    double_grants: AtomicUsize,
    max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    cleanups: AtomicUsize,
}

/// Builds [`MockAdapter`]s; behaviour can be set per target via the
/// credentials' principal
pub struct MockAdapterFactory {
    default: AdapterBehaviour,
    per_principal: Mutex<HashMap<String, AdapterBehaviour>>,
    requires_session: bool,
    shared: Arc<Shared>,
}

impl MockAdapterFactory {
    pub fn new(default: AdapterBehaviour) -> Arc<Self> {
        Arc::new(Self {
            default,
            per_principal: Mutex::new(HashMap::new()),
            requires_session: true,
            shared: Arc::new(Shared::default()),
        })
    }

    /// API-backed variant that never asks for a session
    pub fn sessionless(default: AdapterBehaviour) -> Arc<Self> {
        Arc::new(Self {
            default,
            per_principal: Mutex::new(HashMap::new()),
            requires_session: false,
            shared: Arc::new(Shared::default()),
        })
    }

    pub fn set_behaviour(&self, principal: &str, behaviour: AdapterBehaviour) {
        self.per_principal.lock().insert(principal.to_string(), behaviour);
    }

    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().clone()
    }

    pub fn cleanups(&self) -> usize {
        self.shared.cleanups.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    /// Times a session was driven by two adapter calls at once
    pub fn double_grants(&self) -> usize {
        self.shared.double_grants.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn create(
        &self,
        credentials: &Credentials,
        session: Option<Arc<dyn AutomationSession>>,
    ) -> DomainResult<Box<dyn PlatformAdapter>> {
        let principal = credentials.principal().unwrap_or_default().to_string();
        let behaviour =
            self.per_principal.lock().get(&principal).cloned().unwrap_or_else(|| self.default.clone());
        Ok(Box::new(MockAdapter {
            principal,
            behaviour,
            session_key: session.map(|s| Arc::as_ptr(&s) as *const () as usize),
            shared: self.shared.clone(),
        }))
    }

    fn requires_session(&self, _kind: OperationKind) -> bool {
        self.requires_session
    }
}

pub struct MockAdapter {
    principal: String,
    behaviour: AdapterBehaviour,
    session_key: Option<usize>,
    shared: Arc<Shared>,
}

impl MockAdapter {
    async fn work(&self, kind: OperationKind) -> DomainResult<()> {
        self.shared.calls.lock().push(format!("{}:{kind}", self.principal));
        if let Some(key) = self.session_key {
            if !self.shared.holders.lock().insert(key) {
                self.shared.double_grants.fetch_add(1, Ordering::SeqCst);
            }
        }
        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.behaviour.delay).await;

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(key) = self.session_key {
            self.shared.holders.lock().remove(&key);
        }
        match &self.behaviour.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    async fn authenticate(&self, _credentials: &Credentials) -> DomainResult<()> {
        self.work(OperationKind::Authenticate).await
    }

    async fn push_availability(
        &self,
        items: &[AvailabilityItem],
    ) -> DomainResult<(u32, Vec<String>)> {
        self.work(OperationKind::PushAvailability).await?;
        let ids = items.iter().map(|item| format!("{}-{}", self.principal, item.date)).collect();
        Ok((items.len() as u32, ids))
    }

    async fn push_media(&self, media: &MediaDescriptor) -> DomainResult<(String, String)> {
        self.work(OperationKind::PushMedia).await?;
        Ok((
            format!("media-{}", media.file_name),
            format!("https://cdn.example.test/{}", media.file_name),
        ))
    }

    async fn update_profile(&self, profile: &ProfileUpdate) -> DomainResult<Vec<String>> {
        self.work(OperationKind::UpdateProfile).await?;
        Ok(profile.fields.keys().cloned().collect())
    }

    async fn read_profile(&self) -> DomainResult<ProfileSnapshot> {
        self.work(OperationKind::ReadProfile).await?;
        Ok(ProfileSnapshot { fields: Default::default(), captured_at: Utc::now() })
    }

    async fn cleanup(&self) -> DomainResult<()> {
        self.shared.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
