//! Security event sink.
//!
//! # Responsibilities
//! - Turn threats into immutable `SecurityEvent` records
//! - Hand them to the store through the fail-open queue
//! - Raise an alert for every CRITICAL event
//!
//! # Design Decisions
//! - `log_security_event` never fails; the caller learns only `Delivery`
//! - Alerting happens on the request path, before queueing, so a full
//!   queue never swallows a critical alert

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::security::types::{RequestContext, SecurityEventType, Severity, Threat};
use crate::sinks::queue::{Delivery, QueueWriter};
use crate::sinks::store::{
    DateRange, EventFilter, Page, SecurityEventStore, SecurityStats, StoreError,
};

/// An immutable record of something security-relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub ip_address: String,
    pub user_id: Option<String>,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub description: String,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        description: impl Into<String>,
        context: &RequestContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip_address: context.ip.clone(),
            user_id: None,
            event_type,
            severity,
            description: description.into(),
            user_agent: context.user_agent.clone(),
            method: context.method.clone(),
            url: context.url.clone(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn from_threat(threat: &Threat, context: &RequestContext) -> Self {
        let mut event = Self::new(threat.threat_type, threat.severity, threat.description.clone(), context);
        event.metadata = threat.metadata.clone();
        event
    }

    pub fn with_user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_string);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Out-of-band notification for CRITICAL events.
pub trait AlertChannel: Send + Sync {
    fn alert(&self, event: &SecurityEvent);
}

/// Emits alerts as structured logs on the `fundguard::alert` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlert;

impl AlertChannel for TracingAlert {
    fn alert(&self, event: &SecurityEvent) {
        tracing::error!(
            target: "fundguard::alert",
            event_id = %event.id,
            ip = %event.ip_address,
            event_type = %event.event_type,
            severity = %event.severity,
            url = event.url.as_deref().unwrap_or("-"),
            "CRITICAL security event: {}",
            event.description
        );
    }
}

/// Fail-open writer and query facade for security events.
#[derive(Clone)]
pub struct SecurityEventSink {
    writer: QueueWriter<SecurityEvent>,
    store: Arc<dyn SecurityEventStore>,
    alerts: Arc<dyn AlertChannel>,
}

impl SecurityEventSink {
    /// Start the background writer. The handle completes after shutdown
    /// once the queue is drained.
    pub fn spawn(
        store: Arc<dyn SecurityEventStore>,
        alerts: Arc<dyn AlertChannel>,
        capacity: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let writer_store = store.clone();
        let (writer, handle) = QueueWriter::spawn(
            "security_events",
            capacity,
            move |event: SecurityEvent| {
                let store = writer_store.clone();
                async move { store.append(&event).await }
            },
            shutdown,
        );
        (
            Self {
                writer,
                store,
                alerts,
            },
            handle,
        )
    }

    pub fn log_security_event(&self, event: SecurityEvent) -> Delivery {
        tracing::warn!(
            ip = %event.ip_address,
            event_type = %event.event_type,
            severity = %event.severity,
            method = event.method.as_deref().unwrap_or("-"),
            url = event.url.as_deref().unwrap_or("-"),
            request_id = event.metadata.get("request_id").and_then(serde_json::Value::as_str).unwrap_or("-"),
            "{}",
            event.description
        );
        if event.severity == Severity::Critical {
            self.alerts.alert(&event);
        }
        self.writer.push(event)
    }

    pub async fn query(&self, filter: &EventFilter) -> Result<Page<SecurityEvent>, StoreError> {
        self.store.query(filter).await
    }

    pub async fn stats(&self, range: &DateRange) -> Result<SecurityStats, StoreError> {
        self.store.stats(range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::memory::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAlert(Mutex<Vec<Uuid>>);

    impl AlertChannel for RecordingAlert {
        fn alert(&self, event: &SecurityEvent) {
            self.0.lock().unwrap().push(event.id);
        }
    }

    #[tokio::test]
    async fn test_critical_events_alert_and_persist() {
        let store = Arc::new(MemoryStore::new());
        let alerts = Arc::new(RecordingAlert::default());
        let (tx, rx) = broadcast::channel(1);
        let (sink, handle) = SecurityEventSink::spawn(store.clone(), alerts.clone(), 8, rx);

        let ctx = RequestContext::for_ip("203.0.113.1");
        let critical = SecurityEvent::new(SecurityEventType::BruteForce, Severity::Critical, "bf", &ctx);
        let low = SecurityEvent::new(SecurityEventType::FailedLogin, Severity::Low, "fl", &ctx);
        let critical_id = critical.id;

        assert_eq!(sink.log_security_event(critical), Delivery::Queued);
        assert_eq!(sink.log_security_event(low), Delivery::Queued);
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(*alerts.0.lock().unwrap(), vec![critical_id]);
        let page = sink.query(&EventFilter::default()).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_from_threat_copies_classification() {
        let threat = Threat::new(SecurityEventType::XssAttempt, Severity::High, "XSS detected in body.x")
            .with_meta("field", "body.x");
        let ctx = RequestContext {
            ip: "10.1.1.1".into(),
            user_agent: Some("ua".into()),
            method: Some("POST".into()),
            url: Some("/api/x".into()),
        };
        let event = SecurityEvent::from_threat(&threat, &ctx).with_user(Some("u-1"));
        assert_eq!(event.event_type, SecurityEventType::XssAttempt);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.metadata["field"], "body.x");
        assert_eq!(event.user_id.as_deref(), Some("u-1"));
        assert_eq!(event.method.as_deref(), Some("POST"));
    }
}
