//! Registered automation targets

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tether_domain::{BucketSettings, Credentials, Result, TetherError};

use crate::adapter::AdapterFactory;

/// Everything the orchestrator needs to run operations against one target
#[derive(Clone)]
pub struct TargetRegistration {
    /// Key used by requests and rate limit overrides
    pub target_id: String,
    /// Passed to the adapter for login
    pub credentials: Credentials,
    /// Builds a fresh adapter for every operation
    pub adapter_factory: Arc<dyn AdapterFactory>,
    /// Overrides the default token bucket for this target
    pub rate_limit: Option<BucketSettings>,
}

impl TargetRegistration {
    /// Registration using the default rate limit
    pub fn new(
        target_id: impl Into<String>,
        credentials: Credentials,
        adapter_factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self { target_id: target_id.into(), credentials, adapter_factory, rate_limit: None }
    }

    /// Give this target its own token bucket
    pub fn with_rate_limit(mut self, bucket: BucketSettings) -> Self {
        self.rate_limit = Some(bucket);
        self
    }
}

impl fmt::Debug for TargetRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistration")
            .field("target_id", &self.target_id)
            .field("credentials", &self.credentials)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

/// Concurrent map of target id to registration
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: DashMap<String, Arc<TargetRegistration>>,
}

impl TargetRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a target. Returns the previous registration, if any.
    pub fn register(&self, registration: TargetRegistration) -> Option<Arc<TargetRegistration>> {
        self.targets.insert(registration.target_id.clone(), Arc::new(registration))
    }

    /// Remove a target, returning its registration
    pub fn unregister(&self, target_id: &str) -> Option<Arc<TargetRegistration>> {
        self.targets.remove(target_id).map(|(_, registration)| registration)
    }

    /// Look up a target. Unknown ids are `NotFound`.
    pub fn get(&self, target_id: &str) -> Result<Arc<TargetRegistration>> {
        self.targets
            .get(target_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TetherError::NotFound(format!("target '{target_id}' is not registered")))
    }

    /// Whether `target_id` is registered
    pub fn contains(&self, target_id: &str) -> bool {
        self.targets.contains_key(target_id)
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no targets are registered
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Registered ids, sorted
    pub fn target_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.targets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
