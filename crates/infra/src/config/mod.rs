//! Configuration loading
//!
//! Builds a validated [`tether_domain::Config`] from config files and
//! `TETHER_*` environment variables.

pub mod loader;

pub use loader::{apply_env_overrides, load, load_from_env, load_from_file, probe_config_paths};
