//! Administrative API.
//!
//! Served on its own listener and guarded by a static bearer key. Exposes
//! the event and audit queries, statistics, and manual IP blocking.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::security::tracker::BehavioralTracker;
use crate::sinks::audit::AuditLogSink;
use crate::sinks::events::SecurityEventSink;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub tracker: Arc<BehavioralTracker>,
    pub events: SecurityEventSink,
    pub audit: AuditLogSink,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(
        tracker: Arc<BehavioralTracker>,
        events: SecurityEventSink,
        audit: AuditLogSink,
        api_key: &str,
    ) -> Self {
        Self {
            tracker,
            events,
            audit,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/security/events", get(list_events))
        .route("/admin/security/stats", get(security_stats))
        .route("/admin/security/ips", get(list_ips))
        .route("/admin/security/block", post(block_ip))
        .route("/admin/security/unblock", post(unblock_ip))
        .route("/admin/audit/logs", get(list_audit_logs))
        .route("/admin/audit/stats", get(audit_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
