use std::net::IpAddr;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::AdminState;
use crate::security::tracker::TrackerSnapshot;
use crate::security::types::{Actor, RequestContext, SecurityEventType, Severity};
use crate::sinks::audit::AuditLogEntry;
use crate::sinks::events::SecurityEvent;
use crate::sinks::store::{
    AuditFilter, AuditStats, DateRange, EventFilter, Page, SecurityStats, StoreError,
};
use crate::sinks::taxonomy::AdminAction;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidIp(_) => StatusCode::BAD_REQUEST,
            Self::Store(e) => {
                tracing::error!(error = %e, "Admin query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub blocked_ips: usize,
    pub suspicious_ips: usize,
}

/// Body of the block and unblock endpoints.
#[derive(Debug, Deserialize)]
pub struct IpAction {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Administrator performing the change, recorded in the audit log.
    #[serde(default)]
    pub actor: Option<Actor>,
}

#[derive(Debug, Serialize)]
pub struct IpActionResult {
    pub ip: String,
    pub changed: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.tracker.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        blocked_ips: snapshot.blocked.len(),
        suspicious_ips: snapshot.suspicious.len(),
    })
}

pub async fn list_events(
    State(state): State<AdminState>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<Page<SecurityEvent>>, AdminError> {
    Ok(Json(state.events.query(&filter).await?))
}

pub async fn security_stats(
    State(state): State<AdminState>,
    Query(range): Query<DateRange>,
) -> Result<Json<SecurityStats>, AdminError> {
    Ok(Json(state.events.stats(&range).await?))
}

pub async fn list_ips(State(state): State<AdminState>) -> Json<TrackerSnapshot> {
    Json(state.tracker.snapshot())
}

fn canonical_ip(ip: &str) -> Result<String, AdminError> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical().to_string())
        .map_err(|_| AdminError::InvalidIp(ip.to_string()))
}

pub async fn block_ip(
    State(state): State<AdminState>,
    Json(body): Json<IpAction>,
) -> Result<Json<IpActionResult>, AdminError> {
    let ip = canonical_ip(&body.ip)?;
    let changed = state.tracker.block_ip(&ip);
    let reason = body.reason.as_deref().unwrap_or("manual block");
    record_change(&state, &body, &ip, reason, true);
    Ok(Json(IpActionResult { ip, changed }))
}

pub async fn unblock_ip(
    State(state): State<AdminState>,
    Json(body): Json<IpAction>,
) -> Result<Json<IpActionResult>, AdminError> {
    let ip = canonical_ip(&body.ip)?;
    let changed = state.tracker.unblock_ip(&ip);
    let reason = body.reason.as_deref().unwrap_or("manual unblock");
    record_change(&state, &body, &ip, reason, false);
    Ok(Json(IpActionResult { ip, changed }))
}

fn record_change(state: &AdminState, body: &IpAction, ip: &str, reason: &str, blocked: bool) {
    let (event_type, severity, verb) = if blocked {
        (SecurityEventType::IpBlocked, Severity::High, "blocked")
    } else {
        (SecurityEventType::IpUnblocked, Severity::Low, "unblocked")
    };
    let user_id = body.actor.as_ref().map(|a| a.user_id.as_str());
    let event = SecurityEvent::new(
        event_type,
        severity,
        format!("IP {ip} {verb} by administrator"),
        &RequestContext::for_ip(ip),
    )
    .with_user(user_id)
    .with_meta("reason", reason);
    let _ = state.events.log_security_event(event);

    if let Some(actor) = &body.actor {
        let entry = AuditLogEntry::new(
            actor,
            AdminAction::SecurityChange,
            format!("IP {ip} {verb}: {reason}"),
        )
        .resource("ip", Some(ip.to_string()))
        .with_meta("reason", reason);
        let _ = state.audit.log(entry);
    }
}

pub async fn list_audit_logs(
    State(state): State<AdminState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Page<AuditLogEntry>>, AdminError> {
    Ok(Json(state.audit.query(&filter).await?))
}

pub async fn audit_stats(
    State(state): State<AdminState>,
    Query(range): Query<DateRange>,
) -> Result<Json<AuditStats>, AdminError> {
    Ok(Json(state.audit.stats(&range).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ip() {
        assert_eq!(canonical_ip(" 10.0.0.1 ").unwrap(), "10.0.0.1");
        assert_eq!(canonical_ip("::ffff:10.0.0.1").unwrap(), "10.0.0.1");
        assert!(matches!(canonical_ip("10.0.0"), Err(AdminError::InvalidIp(_))));
    }

    #[test]
    fn test_invalid_ip_is_400() {
        let response = AdminError::InvalidIp("x".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
