//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so that an empty file (or no file) is valid.
//! The only setting without a usable default is the encryption key.

use serde::{Deserialize, Serialize};

use crate::security::types::{RuleFamily, Severity};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Public listener (the intercepted traffic).
    pub listener: ListenerConfig,

    /// Platform API that passed requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Behavioral tracker thresholds and sweep cadence.
    pub tracker: TrackerConfig,

    /// Threat detector tuning.
    pub detector: DetectorConfig,

    /// Client IP resolution.
    pub client_ip: ClientIpConfig,

    /// Where the authenticated actor is read from.
    pub identity: IdentityConfig,

    /// Audit capture settings.
    pub audit: AuditConfig,

    /// Event and audit persistence.
    pub sinks: SinkConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Hex-encoded 32-byte field encryption key. Never written back out.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body buffered for inspection, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Upstream (business API) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Behavioral tracker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Sliding window for failed logins, in seconds.
    pub failed_login_window_secs: u64,

    /// Failed logins within the window that mark an IP suspicious.
    pub failed_login_threshold: usize,

    /// Failed logins within the window that block an IP.
    pub brute_force_threshold: usize,

    /// Requests per IP per clock minute before flagging.
    pub requests_per_minute: u64,

    /// Records read per IP per clock minute before flagging.
    pub mass_data_access_threshold: u64,

    /// Age after which minute buckets are dropped by the sweep, in seconds.
    pub bucket_retention_secs: u64,

    /// Sweep interval in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            failed_login_window_secs: 15 * 60,
            failed_login_threshold: 5,
            brute_force_threshold: 10,
            requests_per_minute: 60,
            mass_data_access_threshold: 100,
            bucket_retention_secs: 5 * 60,
            cleanup_interval_secs: 30 * 60,
        }
    }
}

/// Threat detector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Headers starting with this prefix are inspected.
    pub custom_header_prefix: String,

    /// User agents shorter than this are treated as automation.
    pub min_user_agent_length: usize,

    /// Reject requests carrying a threat at or above this severity.
    /// Unset means only blocking-tier results reject.
    pub reject_threshold: Option<Severity>,

    /// Rules appended after the built-in table.
    pub extra_rules: Vec<CustomRuleConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            custom_header_prefix: "x-".to_string(),
            min_user_agent_length: 10,
            reject_threshold: None,
            extra_rules: Vec::new(),
        }
    }
}

/// An operator-supplied detection rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomRuleConfig {
    pub family: RuleFamily,
    pub pattern: String,
    pub description: String,
}

/// Client IP resolution.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientIpConfig {
    /// Header carrying the original client address.
    pub header: String,

    /// Peers allowed to set `header`. "*" trusts every peer.
    pub trusted_proxies: Vec<String>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            header: "x-forwarded-for".to_string(),
            trusted_proxies: vec!["127.0.0.1".to_string(), "::1".to_string()],
        }
    }
}

/// Identity propagation from the upstream auth layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Accept the identity headers below. Only enable behind an auth gateway.
    pub trust_headers: bool,

    pub user_id_header: String,

    pub email_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_headers: false,
            user_id_header: "x-authenticated-user-id".to_string(),
            email_header: "x-authenticated-user-email".to_string(),
        }
    }
}

/// Audit capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit entries for sensitive routes.
    pub enabled: bool,

    /// Login endpoint observed for failed-login tracking.
    pub login_path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            login_path: "/api/auth/login".to_string(),
        }
    }
}

/// Storage backend for events and audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub backend: StorageBackend,

    /// Database path for the sqlite backend.
    pub sqlite_path: String,

    /// Pending writes per sink before new records are dropped.
    pub queue_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sqlite_path: "fundguard.db".to_string(),
            queue_capacity: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder key; validation refuses to start the admin API with it.
pub const ADMIN_KEY_PLACEHOLDER: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: ADMIN_KEY_PLACEHOLDER.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
