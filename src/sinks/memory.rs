//! In-memory event and audit storage (default backend).
//!
//! Records live for the lifetime of the process. Suitable for a single
//! instance and for tests; use the sqlite backend for durability.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::sinks::audit::AuditLogEntry;
use crate::sinks::events::SecurityEvent;
use crate::sinks::store::{
    AuditFilter, AuditLogStore, AuditStats, DateRange, EventFilter, Page, SecurityEventStore,
    SecurityStats, StoreError,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<Vec<SecurityEvent>>,
    audit: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().expect("event store lock poisoned").len()
    }

    pub fn audit_count(&self) -> usize {
        self.audit.read().expect("audit store lock poisoned").len()
    }
}

#[async_trait]
impl SecurityEventStore for MemoryStore {
    async fn append(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        self.events
            .write()
            .expect("event store lock poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn query(&self, filter: &EventFilter) -> Result<Page<SecurityEvent>, StoreError> {
        let events = self.events.read().expect("event store lock poisoned");
        let mut matches: Vec<_> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::slice(matches, filter.limit(), filter.offset()))
    }

    async fn stats(&self, range: &DateRange) -> Result<SecurityStats, StoreError> {
        let events = self.events.read().expect("event store lock poisoned");
        Ok(SecurityStats::collect(
            events.iter().filter(|e| range.contains(&e.created_at)),
        ))
    }
}

#[async_trait]
impl AuditLogStore for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.audit
            .write()
            .expect("audit store lock poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Page<AuditLogEntry>, StoreError> {
        let audit = self.audit.read().expect("audit store lock poisoned");
        let mut matches: Vec<_> = audit.iter().filter(|e| filter.matches(e)).cloned().collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::slice(matches, filter.limit(), filter.offset()))
    }

    async fn stats(&self, range: &DateRange) -> Result<AuditStats, StoreError> {
        let audit = self.audit.read().expect("audit store lock poisoned");
        Ok(AuditStats::collect(
            audit.iter().filter(|e| range.contains(&e.created_at)),
        ))
    }
}
