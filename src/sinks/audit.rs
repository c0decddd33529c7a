//! Audit log sink.
//!
//! Audit entries describe who did what to which resource, and whether it
//! worked. They reference resources by type and id only, so they outlive
//! the rows they describe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::security::types::{Actor, RequestContext};
use crate::sinks::queue::{Delivery, QueueWriter};
use crate::sinks::store::{AuditFilter, AuditLogStore, AuditStats, DateRange, Page, StoreError};
use crate::sinks::taxonomy::{AuditAction, AuditCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Error,
}

impl Outcome {
    /// 2xx is success, everything else is failure.
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub user_email: Option<String>,
    pub action: AuditAction,
    pub category: AuditCategory,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub outcome: Outcome,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(actor: &Actor, action: impl Into<AuditAction>, description: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            id: Uuid::new_v4(),
            user_id: actor.user_id.clone(),
            user_email: actor.email.clone(),
            action,
            category: action.category(),
            resource_type: None,
            resource_id: None,
            description: description.into(),
            ip_address: None,
            user_agent: None,
            method: None,
            url: None,
            outcome: Outcome::Success,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: Option<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = resource_id;
        self
    }

    pub fn context(mut self, context: &RequestContext) -> Self {
        self.ip_address = Some(context.ip.clone());
        self.user_agent = context.user_agent.clone();
        self.method = context.method.clone();
        self.url = context.url.clone();
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Fail-open writer and query facade for audit entries.
#[derive(Clone)]
pub struct AuditLogSink {
    writer: QueueWriter<AuditLogEntry>,
    store: Arc<dyn AuditLogStore>,
}

impl AuditLogSink {
    pub fn spawn(
        store: Arc<dyn AuditLogStore>,
        capacity: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let writer_store = store.clone();
        let (writer, handle) = QueueWriter::spawn(
            "audit_logs",
            capacity,
            move |entry: AuditLogEntry| {
                let store = writer_store.clone();
                async move { store.append(&entry).await }
            },
            shutdown,
        );
        (Self { writer, store }, handle)
    }

    pub fn log(&self, entry: AuditLogEntry) -> Delivery {
        tracing::info!(
            user_id = %entry.user_id,
            action = %entry.action,
            outcome = entry.outcome.as_str(),
            resource_type = entry.resource_type.as_deref().unwrap_or("-"),
            resource_id = entry.resource_id.as_deref().unwrap_or("-"),
            "Audit: {}",
            entry.description
        );
        self.writer.push(entry)
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Page<AuditLogEntry>, StoreError> {
        self.store.query(filter).await
    }

    pub async fn stats(&self, range: &DateRange) -> Result<AuditStats, StoreError> {
        self.store.stats(range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::memory::MemoryStore;
    use crate::sinks::taxonomy::{AdminAction, ProjectAction};

    fn admin() -> Actor {
        Actor::new("admin-1", Some("admin@fund.example".into()))
    }

    #[test]
    fn test_builder_derives_category() {
        let entry = AuditLogEntry::new(&admin(), ProjectAction::Approved, "Approved project")
            .resource("project", Some("p-9".into()))
            .context(&RequestContext::for_ip("10.0.0.2"))
            .outcome(Outcome::Failure);
        assert_eq!(entry.category, AuditCategory::Project);
        assert_eq!(entry.resource_id.as_deref(), Some("p-9"));
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(entry.outcome, Outcome::Failure);
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(Outcome::from_status(200), Outcome::Success);
        assert_eq!(Outcome::from_status(204), Outcome::Success);
        assert_eq!(Outcome::from_status(403), Outcome::Failure);
        assert_eq!(Outcome::from_status(500), Outcome::Failure);
    }

    #[tokio::test]
    async fn test_query_and_stats() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = broadcast::channel(1);
        let (sink, handle) = AuditLogSink::spawn(store, 8, rx);

        let _ = sink.log(AuditLogEntry::new(&admin(), ProjectAction::Approved, "a"));
        let _ = sink.log(AuditLogEntry::new(&admin(), ProjectAction::Rejected, "b").outcome(Outcome::Failure));
        let _ = sink.log(AuditLogEntry::new(&admin(), AdminAction::DataExport, "c"));
        tx.send(()).unwrap();
        handle.await.unwrap();

        let page = sink
            .query(&AuditFilter {
                category: Some(AuditCategory::Project),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let stats = sink.stats(&DateRange::default()).await.unwrap();
        assert_eq!(stats.total, 3);
        let project = stats.by_category[&AuditCategory::Project];
        assert_eq!((project.success, project.failure, project.error), (1, 1, 0));
    }
}
