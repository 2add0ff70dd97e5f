//! Shared test helpers for `tether-core` integration tests.
//!
//! Lightweight mocks for the session and adapter ports, plus fixtures for
//! building an orchestrator with a handful of registered targets.

#![allow(dead_code)]

pub mod adapters;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

use tether_common::{RateLimitMode, RateLimiter, RateLimiterConfig, TokenBucketConfig};
use tether_core::{
    AdapterFactory, Orchestrator, OrchestratorConfig, PoolConfig, ResourcePool,
    TargetRegistration,
};
use tether_domain::{AvailabilityItem, AvailabilityStatus, Credentials, OperationPayload};

pub use adapters::{AdapterBehaviour, MockAdapterFactory};
pub use sessions::{MockSession, MockSessionFactory};

/// Limiter generous enough never to interfere
pub fn unlimited() -> Arc<RateLimiter> {
    let config = RateLimiterConfig {
        default: TokenBucketConfig::new(10_000, Duration::from_secs(1)),
        ..RateLimiterConfig::default()
    };
    Arc::new(RateLimiter::new(config).unwrap())
}

pub fn limiter(capacity: u32, window: Duration, mode: RateLimitMode) -> Arc<RateLimiter> {
    let config = RateLimiterConfig {
        default: TokenBucketConfig::new(capacity, window),
        mode,
        ..RateLimiterConfig::default()
    };
    Arc::new(RateLimiter::new(config).unwrap())
}

pub fn pool(max_resources: usize, sessions: &Arc<MockSessionFactory>) -> ResourcePool {
    let config = PoolConfig::builder().max_resources(max_resources).build().unwrap();
    ResourcePool::new(config, sessions.clone()).unwrap()
}

/// Orchestrator with `max_concurrent` run slots and one target per id, all
/// served by `adapters`. Each target logs in as a principal named after it.
pub fn orchestrator(
    max_concurrent: usize,
    operation_timeout: Duration,
    pool: ResourcePool,
    limiter: Arc<RateLimiter>,
    targets: &[&str],
    adapters: Arc<dyn AdapterFactory>,
) -> Orchestrator {
    let config = OrchestratorConfig::builder()
        .max_concurrent_operations(max_concurrent)
        .operation_timeout(operation_timeout)
        .cleanup_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(config, pool, limiter).unwrap();
    for target in targets {
        orchestrator
            .register_target(TargetRegistration::new(
                *target,
                Credentials::password(*target, "hunter2"),
                adapters.clone(),
            ))
            .unwrap();
    }
    orchestrator
}

pub fn availability(days: u32) -> OperationPayload {
    let items = (1..=days)
        .map(|d| AvailabilityItem {
            date: chrono::NaiveDate::from_ymd_opt(2026, 5, d).unwrap(),
            status: AvailabilityStatus::Available,
            note: None,
        })
        .collect();
    OperationPayload::PushAvailability(items)
}
