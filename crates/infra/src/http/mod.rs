//! HTTP helpers for API-backed adapters
//!
//! Adapters that talk to a platform's REST API instead of driving a browser
//! session use these to turn responses into classified `TetherError`s, so
//! the retry policy can tell a 503 from a 400.

pub mod classify;

pub use classify::{classify_status, ensure_success, retry_after_secs};
