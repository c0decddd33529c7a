//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, defaults for missing sections)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to startup, which builds every component from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secrets (encryption key, admin key) are expected from the environment

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, load_config, ConfigError, CONFIG_PATH_ENV};
pub use schema::{
    AdminConfig, AuditConfig, ClientIpConfig, CustomRuleConfig, DetectorConfig, GuardConfig,
    IdentityConfig, ListenerConfig, ObservabilityConfig, SinkConfig, StorageBackend,
    TrackerConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
