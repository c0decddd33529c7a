//! Startup orchestration.
//!
//! # Responsibilities
//! - Verify the encryption key before anything else starts
//! - Open storage and spawn the sink writers and the tracker sweeper
//! - Assemble the interception layer and the admin state
//! - Bind listeners and run until shutdown, then wait for writers to drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::GuardConfig;
use crate::crypto::codec::{CryptoError, FieldCipher};
use crate::http::{GuardServer, SecurityLayer};
use crate::security::detector::ThreatDetector;
use crate::security::tracker::BehavioralTracker;
use crate::sinks::events::TracingAlert;
use crate::sinks::{AuditLogSink, SecurityEventSink, StoreError, Stores};

use super::shutdown::Shutdown;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("encryption: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage: {0}")]
    Store(#[from] StoreError),

    #[error("invalid upstream address: {0}")]
    Upstream(#[from] axum::http::uri::InvalidUri),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every long-lived component, wired together.
pub struct Guard {
    pub config: GuardConfig,
    pub cipher: Arc<FieldCipher>,
    pub tracker: Arc<BehavioralTracker>,
    pub layer: SecurityLayer,
    tasks: Vec<JoinHandle<()>>,
}

impl Guard {
    /// Build all components from a validated config with the given stores.
    pub fn build(config: GuardConfig, stores: Stores, shutdown: &Shutdown) -> Result<Self, StartupError> {
        let cipher = FieldCipher::from_hex_key(config.encryption_key.as_deref().unwrap_or(""))?;
        tracing::info!("Field encryption key loaded");

        let tracker = Arc::new(BehavioralTracker::new(config.tracker.clone()));
        let sweeper = tracker.clone().spawn_sweeper(shutdown.subscribe());

        let capacity = config.sinks.queue_capacity;
        let (events, events_writer) = SecurityEventSink::spawn(
            stores.events,
            Arc::new(TracingAlert),
            capacity,
            shutdown.subscribe(),
        );
        let (audit, audit_writer) = AuditLogSink::spawn(stores.audit, capacity, shutdown.subscribe());

        let detector = Arc::new(ThreatDetector::new(&config.detector));
        let layer = SecurityLayer::new(&config, tracker.clone(), detector, events, audit);

        Ok(Self {
            config,
            cipher: Arc::new(cipher),
            tracker,
            layer,
            tasks: vec![sweeper, events_writer, audit_writer],
        })
    }

    /// Build with the configured storage backend.
    pub fn open(config: GuardConfig, shutdown: &Shutdown) -> Result<Self, StartupError> {
        let stores = Stores::open(&config.sinks)?;
        Self::build(config, stores, shutdown)
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState::new(
            self.tracker.clone(),
            self.layer.events().clone(),
            self.layer.audit().clone(),
            &self.config.admin.api_key,
        )
    }

    /// Serve until `shutdown` fires, then wait for background tasks.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let server = GuardServer::new(&self.config, self.layer.clone())?;
        let listener = TcpListener::bind(&self.config.listener.bind_address).await?;

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let app = setup_admin_router(self.admin_state());
            let mut rx = shutdown.subscribe();
            tracing::info!(address = %self.config.admin.bind_address, "Admin API listening");
            tokio::spawn(async move {
                let result = axum::serve(admin_listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let result = server.run(listener, shutdown.subscribe()).await;

        // The server can also stop on its own (listener error).
        shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }
        tracing::info!("Shutdown complete");
        result.map_err(StartupError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_fatal() {
        let shutdown = Shutdown::new();
        let result = Guard::build(GuardConfig::default(), Stores::memory(), &shutdown);
        assert!(matches!(result, Err(StartupError::Crypto(CryptoError::MissingKey))));
    }

    #[tokio::test]
    async fn test_build_with_key() {
        let shutdown = Shutdown::new();
        let config = GuardConfig {
            encryption_key: Some(FieldCipher::generate_hex_key()),
            ..Default::default()
        };
        let guard = Guard::build(config, Stores::memory(), &shutdown).unwrap();
        assert!(guard.cipher.encrypt(Some("x")).unwrap().is_some());
        assert_eq!(shutdown.receiver_count(), 3);

        shutdown.trigger();
        for task in guard.tasks {
            task.await.unwrap();
        }
    }
}
