//! Configuration loader
//!
//! Loads application configuration from files and environment variables.
//!
//! ## Loading Strategy
//! 1. Load a `.env` file from the working directory, if there is one
//! 2. Read the file named by `TETHER_CONFIG`, or the first file found by
//!    [`probe_config_paths`], or start from [`Config::default`]
//! 3. Apply environment variable overrides on top
//! 4. Validate the result
//!
//! Every config field has a default, so files only carry what they change.
//!
//! ## Environment Variables
//! - `TETHER_CONFIG`: Explicit config file path
//! - `TETHER_DB_PATH`: Database file path
//! - `TETHER_DB_POOL_SIZE`: Connection pool size
//! - `TETHER_MAX_CONCURRENT_OPERATIONS`: Orchestrator concurrency cap
//! - `TETHER_OPERATION_TIMEOUT_MS`: Per-operation timeout
//! - `TETHER_POOL_MAX_RESOURCES`: Resource pool cap
//! - `TETHER_POOL_IDLE_TIMEOUT_MS`: Idle eviction timeout
//! - `TETHER_RATE_LIMIT_NON_BLOCKING`: Fail instead of waiting for tokens
//! - `TETHER_LOG_LEVEL`: Default log filter
//! - `TETHER_LOG_JSON`: JSON log output (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./tether.toml`, `./tether.json`, `./config.toml`, `./config.json`
//! 2. The same names in `../` and `../../`
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tether_domain::{Config, Result, TetherError};

const CONFIG_FILE_NAMES: [&str; 4] = ["tether.toml", "tether.json", "config.toml", "config.json"];

/// Load configuration with the full fallback strategy
///
/// # Errors
/// Returns `TetherError::Config` if a file or variable is malformed or the
/// resulting configuration fails validation.
pub fn load() -> Result<Config> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env file"),
    }

    let explicit = std::env::var_os("TETHER_CONFIG").map(PathBuf::from);
    let mut config = match explicit.or_else(probe_config_paths) {
        Some(path) => load_file(&path)?,
        None => {
            tracing::info!("No config file found, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from defaults plus environment variables only
///
/// # Errors
/// Returns `TetherError::Config` if a variable has an invalid value or the
/// result fails validation.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. TOML and JSON are
/// supported, detected by file extension. Environment variables are not
/// applied.
///
/// # Errors
/// Returns `TetherError::Config` if the file is missing, unparsable or
/// invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => p,
        None => probe_config_paths().ok_or_else(|| {
            TetherError::Config("No config file found in any of the standard locations".into())
        })?,
    };
    let config = load_file(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(TetherError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| TetherError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration by file extension (`.toml` or `.json`)
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| TetherError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| TetherError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(TetherError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Overwrite `config` fields from any `TETHER_*` variables that are set
///
/// # Errors
/// Returns `TetherError::Config` naming the variable with an invalid value.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(path) = std::env::var("TETHER_DB_PATH") {
        config.database.path = path;
    }
    if let Some(size) = env_parse("TETHER_DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }
    if let Some(max) = env_parse("TETHER_MAX_CONCURRENT_OPERATIONS")? {
        config.orchestrator.max_concurrent_operations = max;
    }
    if let Some(ms) = env_parse("TETHER_OPERATION_TIMEOUT_MS")? {
        config.orchestrator.operation_timeout_ms = ms;
    }
    if let Some(max) = env_parse("TETHER_POOL_MAX_RESOURCES")? {
        config.pool.max_resources = max;
    }
    if let Some(ms) = env_parse("TETHER_POOL_IDLE_TIMEOUT_MS")? {
        config.pool.idle_timeout_ms = ms;
    }
    if let Some(flag) = env_bool("TETHER_RATE_LIMIT_NON_BLOCKING") {
        config.rate_limits.non_blocking = flag;
    }
    if let Ok(level) = std::env::var("TETHER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(flag) = env_bool("TETHER_LOG_JSON") {
        config.logging.json = flag;
    }
    Ok(())
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
        dirs.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

/// Parse an optional numeric environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TetherError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse an optional boolean environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
/// Anything else counts as false.
fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
