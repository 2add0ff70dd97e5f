//! Durable, auditable record of attempted operations

pub mod memory;
pub mod ports;
pub mod service;

pub use memory::InMemorySyncRecordRepository;
pub use ports::{OperationDispatcher, SyncRecordRepository};
pub use service::{SyncLedger, TrackedOperation};
