//! Platform adapters

pub mod ports;

pub use ports::{dispatch, AdapterFactory, PlatformAdapter};
