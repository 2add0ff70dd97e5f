//! # Tether Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The SQLite sync ledger repository (r2d2 pool, embedded schema)
//! - Configuration loading from files and environment variables
//! - Logging initialisation
//! - Error conversions for rusqlite and reqwest
//! - HTTP response classification for API-backed adapters
//! - [`SyncContext`], the composition root
//!
//! ## Architecture
//! - Implements traits defined in `tether-core`
//! - Contains all "impure" code (file system, database, network)

pub mod config;
pub mod context;
pub mod database;
pub mod errors;
pub mod http;
pub mod logging;

// Re-export commonly used items
pub use context::SyncContext;
pub use database::{DbManager, SqliteSyncRecordRepository};
pub use errors::InfraError;
pub use http::{classify_status, ensure_success, retry_after_secs};
pub use logging::init_logging;
