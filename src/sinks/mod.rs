//! Security event and audit log sinks.
//!
//! # Data Flow
//! ```text
//! interception layer / admin API / business code
//!     → events.rs  SecurityEventSink::log_security_event ─┐
//!     → audit.rs   AuditLogSink::log                      ├→ queue.rs (bounded, drop-newest)
//!                                                         │      → writer task
//!                                                         └────────→ store.rs trait objects
//!                                                                      → memory.rs | sqlite.rs
//! ```
//!
//! # Design Decisions
//! - Fail-open: logging never fails a request; drops and write errors are
//!   counted and logged
//! - Stores are append-only by construction (no update/delete in the traits)
//! - One backend serves both sinks

pub mod audit;
pub mod events;
pub mod memory;
pub mod queue;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
pub mod taxonomy;

use std::sync::Arc;

use crate::config::{SinkConfig, StorageBackend};

pub use audit::{AuditLogEntry, AuditLogSink, Outcome};
pub use events::{AlertChannel, SecurityEvent, SecurityEventSink, TracingAlert};
pub use memory::MemoryStore;
pub use queue::Delivery;
pub use store::{
    AuditFilter, AuditLogStore, AuditStats, DateRange, EventFilter, Page, SecurityEventStore,
    SecurityStats, StoreError,
};
pub use taxonomy::{AuditAction, AuditCategory};

/// Both stores, backed by the same storage.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn SecurityEventStore>,
    pub audit: Arc<dyn AuditLogStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            events: store.clone(),
            audit: store,
        }
    }

    /// Open the configured backend.
    pub fn open(config: &SinkConfig) -> Result<Self, StoreError> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::memory()),
            #[cfg(feature = "sqlite")]
            StorageBackend::Sqlite => {
                let store = Arc::new(sqlite::SqliteStore::open(&config.sqlite_path)?);
                tracing::info!(path = %config.sqlite_path, "Opened sqlite event store");
                Ok(Self {
                    events: store.clone(),
                    audit: store,
                })
            }
            #[cfg(not(feature = "sqlite"))]
            StorageBackend::Sqlite => Err(StoreError::Backend(
                "sqlite backend requires the `sqlite` feature".to_string(),
            )),
        }
    }
}
