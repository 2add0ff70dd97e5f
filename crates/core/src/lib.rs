//! # Tether Core
//!
//! Orchestration logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - The resource pool for heavyweight automation sessions
//! - The operation orchestrator (admission, timeouts, bulk execution)
//! - The sync ledger service
//! - Port interfaces (traits) for sessions, adapters and ledger storage
//!
//! ## Architecture Principles
//! - Depends only on `tether-common` and `tether-domain`
//! - No database, HTTP, or browser code
//! - All external dependencies via traits

pub mod adapter;
pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod pool;

pub use adapter::{dispatch, AdapterFactory, PlatformAdapter};
pub use config::{
    rate_limiter_config, retry_config, OrchestratorConfig, OrchestratorConfigBuilder, PoolConfig,
    PoolConfigBuilder,
};
pub use ledger::{
    InMemorySyncRecordRepository, OperationDispatcher, SyncLedger, SyncRecordRepository,
    TrackedOperation,
};
pub use orchestrator::{
    OperationEvent, Orchestrator, ShutdownReport, TargetRegistration, TargetRegistry,
};
pub use pool::{
    AutomationSession, PooledResource, PooledSession, ResourceId, ResourcePool, ResourceState,
    SessionFactory,
};
