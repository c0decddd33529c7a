//! Field-level encryption at rest.
//!
//! # Data Flow
//! ```text
//! business write path:
//!     → fields.rs (pick allow-listed fields, skip already encrypted)
//!     → codec.rs (AES-256-GCM, "iv:tag:ciphertext" hex)
//!     → storage (row encryption_version = 1)
//!
//! business read path:
//!     storage → codec.rs decrypt (legacy plaintext passes through unchanged)
//!
//! bulk upgrade:
//!     migration.rs (rows with encryption_version = 0, keyset batches)
//! ```
//!
//! # Design Decisions
//! - One process-wide key; a missing or malformed key is fatal at startup
//! - Fresh random IV per value, never reused
//! - Structurally invalid values are treated as un-migrated plaintext
//! - Per-call decrypt failures are logged and the stored value is returned

pub mod codec;
pub mod fields;
pub mod migration;

pub use codec::{CryptoError, FieldCipher, ENCRYPTION_KEY_ENV, LEGACY_ENCRYPTION_KEY_ENV};
pub use fields::KYC_FIELDS;
pub use migration::{FieldMigration, MigrationError, MigrationReport, PendingRecord, RecordStore};

/// Row-level marker for plaintext (not yet migrated) records.
pub const ENCRYPTION_VERSION_PLAINTEXT: i64 = 0;

/// Row-level marker for records written with the current scheme.
pub const ENCRYPTION_VERSION_CURRENT: i64 = 1;
