//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, escalation ladder ordered, durations bounded)
//! - Check addresses, header names and custom rule patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - The encryption key itself is checked by the codec at startup

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderName;

use crate::config::schema::{GuardConfig, ADMIN_KEY_PLACEHOLDER};

/// Upper bound for every `*_secs` setting (30 days).
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be > 0"));
    }
    if !is_host_port(&config.upstream.address) {
        errors.push(ValidationError::new("upstream.address", "expected host:port"));
    }

    let tracker = &config.tracker;
    for (field, secs) in [
        ("upstream.request_timeout_secs", config.upstream.request_timeout_secs),
        ("tracker.failed_login_window_secs", tracker.failed_login_window_secs),
        ("tracker.cleanup_interval_secs", tracker.cleanup_interval_secs),
    ] {
        if secs == 0 || secs > MAX_DURATION_SECS {
            errors.push(ValidationError::new(field, format!("must be in 1..={MAX_DURATION_SECS}")));
        }
    }
    if tracker.failed_login_threshold == 0 {
        errors.push(ValidationError::new("tracker.failed_login_threshold", "must be > 0"));
    }
    if tracker.brute_force_threshold < tracker.failed_login_threshold {
        errors.push(ValidationError::new(
            "tracker.brute_force_threshold",
            "must be >= failed_login_threshold",
        ));
    }
    if tracker.requests_per_minute == 0 {
        errors.push(ValidationError::new("tracker.requests_per_minute", "must be > 0"));
    }
    if tracker.mass_data_access_threshold == 0 {
        errors.push(ValidationError::new("tracker.mass_data_access_threshold", "must be > 0"));
    }
    if !(60..=MAX_DURATION_SECS).contains(&tracker.bucket_retention_secs) {
        errors.push(ValidationError::new(
            "tracker.bucket_retention_secs",
            format!("must be in 60..={MAX_DURATION_SECS}"),
        ));
    }

    let prefix = &config.detector.custom_header_prefix;
    if prefix.is_empty() || prefix.to_ascii_lowercase() != *prefix {
        errors.push(ValidationError::new(
            "detector.custom_header_prefix",
            "must be non-empty lowercase",
        ));
    }
    for rule in &config.detector.extra_rules {
        if let Err(e) = regex::Regex::new(&rule.pattern) {
            errors.push(ValidationError::new("detector.extra_rules", format!("{:?}: {e}", rule.pattern)));
        }
    }

    if HeaderName::from_bytes(config.client_ip.header.as_bytes()).is_err() {
        errors.push(ValidationError::new("client_ip.header", "invalid header name"));
    }
    for proxy in &config.client_ip.trusted_proxies {
        if proxy != "*" && proxy.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new("client_ip.trusted_proxies", format!("{proxy:?} is not an IP")));
        }
    }

    for (field, name) in [
        ("identity.user_id_header", &config.identity.user_id_header),
        ("identity.email_header", &config.identity.email_header),
    ] {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(field, "invalid header name"));
        }
    }
    if !config.audit.login_path.starts_with('/') {
        errors.push(ValidationError::new("audit.login_path", "must start with '/'"));
    }

    if config.sinks.queue_capacity == 0 {
        errors.push(ValidationError::new("sinks.queue_capacity", "must be > 0"));
    }

    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new("observability.log_format", "expected \"pretty\" or \"json\""));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() || config.admin.api_key == ADMIN_KEY_PLACEHOLDER {
            errors.push(ValidationError::new("admin.api_key", "set a real key before enabling the admin API"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    let explicit_port = address
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    match url::Url::parse(&format!("http://{address}")) {
        Ok(url) => explicit_port && url.host_str().is_some() && url.path() == "/",
        Err(_) => false,
    }
}
