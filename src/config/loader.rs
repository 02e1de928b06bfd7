//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Override for the vote timeout (milliseconds)
const ENV_TIMEOUT_MS: &str = "REPLICA_COMMIT_TIMEOUT_MS";
/// Override for the failure threshold
const ENV_FAILURE_THRESHOLD: &str = "REPLICA_COMMIT_FAILURE_THRESHOLD";
/// Override for the per-send timeout (milliseconds)
const ENV_SEND_TIMEOUT_MS: &str = "REPLICA_COMMIT_SEND_TIMEOUT_MS";
/// Override for the log level
const ENV_LOG_LEVEL: &str = "REPLICA_COMMIT_LOG_LEVEL";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        timeout_ms = config.transaction.timeout_ms,
        failure_threshold = config.transaction.failure_threshold,
        send_timeout_ms = config.transaction.send_timeout_ms,
        "Configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `REPLICA_COMMIT_TIMEOUT_MS`: Override the vote timeout
/// - `REPLICA_COMMIT_FAILURE_THRESHOLD`: Override the failure threshold
/// - `REPLICA_COMMIT_SEND_TIMEOUT_MS`: Override the per-send timeout
/// - `REPLICA_COMMIT_LOG_LEVEL`: Override log level
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing, or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Default configuration with environment variable overrides
///
/// Same variables as [`load_config_with_env`], for running without a file.
///
/// # Errors
///
/// Returns `ConfigError` if an override fails to parse or validate.
pub fn load_default_with_env() -> Result<Config, ConfigError> {
    let mut config = Config::default_config();
    apply_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides from `lookup`, then re-validate
fn apply_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(ENV_TIMEOUT_MS) {
        config.transaction.timeout_ms = parse_env(ENV_TIMEOUT_MS, &value)?;
        debug!("Vote timeout overridden to {}ms", config.transaction.timeout_ms);
    }

    if let Some(value) = lookup(ENV_FAILURE_THRESHOLD) {
        config.transaction.failure_threshold = parse_env(ENV_FAILURE_THRESHOLD, &value)?;
        debug!(
            "Failure threshold overridden to {}",
            config.transaction.failure_threshold
        );
    }

    if let Some(value) = lookup(ENV_SEND_TIMEOUT_MS) {
        config.transaction.send_timeout_ms = parse_env(ENV_SEND_TIMEOUT_MS, &value)?;
        debug!(
            "Send timeout overridden to {}ms",
            config.transaction.send_timeout_ms
        );
    }

    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    // Re-validate after overrides
    config.validate()
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::EnvError {
        name: name.into(),
        reason: format!("Invalid number: {value}"),
    })
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
