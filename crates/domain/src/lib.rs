//! # Tether Domain
//!
//! Data types shared by every Tether layer.
//!
//! This crate contains:
//! - Operation, ledger and statistics types
//! - The domain error type and `Result` alias
//! - Serialisable configuration sections
//! - Default values
//!
//! ## Architecture
//! - Depends only on `tether-common` (foundation tier) for error
//!   classification
//! - No I/O, no async runtime

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
