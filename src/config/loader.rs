//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::crypto::{ENCRYPTION_KEY_ENV, LEGACY_ENCRYPTION_KEY_ENV};

/// Environment variable naming the TOML file to load.
pub const CONFIG_PATH_ENV: &str = "FUNDGUARD_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then process environment, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GuardConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GuardConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply recognised environment overrides through `lookup`.
pub fn apply_env_overrides<F>(config: &mut GuardConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup(ENCRYPTION_KEY_ENV).or_else(|| lookup(LEGACY_ENCRYPTION_KEY_ENV)) {
        config.encryption_key = Some(key);
    }
    if let Some(v) = lookup("FUNDGUARD_BIND") {
        config.listener.bind_address = v;
    }
    if let Some(v) = lookup("FUNDGUARD_UPSTREAM") {
        config.upstream.address = v;
    }
    if let Some(v) = lookup("FUNDGUARD_ADMIN_API_KEY") {
        config.admin.api_key = v;
    }

    let tracker = &mut config.tracker;
    if let Some(minutes) = parse_var::<u64, _>(&lookup, "FAILED_LOGIN_WINDOW_MINUTES")? {
        tracker.failed_login_window_secs = minutes.checked_mul(60).ok_or_else(|| ConfigError::Env {
            var: "FAILED_LOGIN_WINDOW_MINUTES",
            value: minutes.to_string(),
        })?;
    }
    if let Some(n) = parse_var(&lookup, "FAILED_LOGIN_THRESHOLD")? {
        tracker.failed_login_threshold = n;
    }
    if let Some(n) = parse_var(&lookup, "BRUTE_FORCE_THRESHOLD")? {
        tracker.brute_force_threshold = n;
    }
    if let Some(n) = parse_var(&lookup, "RATE_LIMIT_PER_MINUTE")? {
        tracker.requests_per_minute = n;
    }
    if let Some(n) = parse_var(&lookup, "MASS_DATA_ACCESS_THRESHOLD")? {
        tracker.mass_data_access_threshold = n;
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
