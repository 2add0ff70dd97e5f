//! Default values shared by configuration and the orchestration layer

// Orchestrator
/// Run slots shared by all targets
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 5;
/// Per-operation deadline
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 60_000;
/// Bound on adapter cleanup
pub const DEFAULT_CLEANUP_TIMEOUT_MS: u64 = 5_000;
/// Wait for running operations during shutdown
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;
/// Lifecycle events buffered per subscriber
pub const OPERATION_EVENT_CAPACITY: usize = 256;

// Resource pool
/// Browser sessions kept at once
pub const DEFAULT_POOL_MAX_RESOURCES: usize = 3;
/// Wait for a free session
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
/// Idle sessions close after five minutes
pub const DEFAULT_POOL_IDLE_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

// Rate limiting: scraped targets get a small bucket, API targets override it
/// Requests per window for targets without an override
pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 10;
/// Bucket refill window
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Suggested capacity for API-backed targets
pub const API_RATE_LIMIT_CAPACITY: u32 = 100;

// Retry
/// Attempts including the first
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
/// First backoff delay
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1_000;
/// Backoff growth factor
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Backoff ceiling
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

// Storage
/// SQLite file for the ledger
pub const DEFAULT_DB_PATH: &str = "tether.db";
/// r2d2 connections
pub const DEFAULT_DB_POOL_SIZE: u32 = 4;
/// Records returned by history queries
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// Logging
/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";
