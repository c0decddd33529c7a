//! Request interception layer.
//!
//! # Request Lifecycle
//! ```text
//! ENTERED
//!     → resolve client IP
//!     → BLOCK_CHECKED   blocked IP: IP_BLACKLISTED event, 403
//!     → buffer body     over the limit: 413
//!     → THREAT_ANALYZED rate check + detector, every threat logged
//!     → REJECTED        any blocking threat (or one at the reject threshold): 403
//!     → PASSED          next handler
//!         → failed login on the login path: tracker + event
//!         → sensitive route with a known actor: audit entry
//! ```
//!
//! # Design Decisions
//! - No detector detail reaches the client
//! - Logging is fire-and-forget; a full or failing sink never fails a request
//! - The body is buffered once and handed on unchanged

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{connect_info::MockConnectInfo, ConnectInfo, State},
    http::{request::Parts, HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::{AuditConfig, GuardConfig, IdentityConfig};
use crate::http::inspect::{inspect, login_username, request_context};
use crate::http::response;
use crate::http::sensitive::SensitiveRoutes;
use crate::observability::metrics::{self, Verdict};
use crate::security::client_ip::ClientIpResolver;
use crate::security::detector::ThreatAnalyzer;
use crate::security::tracker::BehavioralTracker;
use crate::security::types::{Actor, RequestContext, SecurityEventType, Severity, Threat};
use crate::sinks::audit::{AuditLogEntry, AuditLogSink, Outcome};
use crate::sinks::events::{SecurityEvent, SecurityEventSink};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state of the interception layer.
#[derive(Clone)]
pub struct SecurityLayer {
    tracker: Arc<BehavioralTracker>,
    analyzer: Arc<dyn ThreatAnalyzer>,
    events: SecurityEventSink,
    audit: AuditLogSink,
    resolver: Arc<ClientIpResolver>,
    routes: Arc<SensitiveRoutes>,
    identity: Arc<IdentityConfig>,
    audit_config: Arc<AuditConfig>,
    reject_threshold: Option<Severity>,
    max_body_size: usize,
}

impl SecurityLayer {
    pub fn new(
        config: &GuardConfig,
        tracker: Arc<BehavioralTracker>,
        analyzer: Arc<dyn ThreatAnalyzer>,
        events: SecurityEventSink,
        audit: AuditLogSink,
    ) -> Self {
        Self {
            tracker,
            analyzer,
            events,
            audit,
            resolver: Arc::new(ClientIpResolver::new(&config.client_ip)),
            routes: Arc::new(SensitiveRoutes::builtin()),
            identity: Arc::new(config.identity.clone()),
            audit_config: Arc::new(config.audit.clone()),
            reject_threshold: config.detector.reject_threshold,
            max_body_size: config.listener.max_body_size,
        }
    }

    pub fn tracker(&self) -> &Arc<BehavioralTracker> {
        &self.tracker
    }

    pub fn events(&self) -> &SecurityEventSink {
        &self.events
    }

    pub fn audit(&self) -> &AuditLogSink {
        &self.audit
    }

    fn rejects(&self, threat: &Threat) -> bool {
        threat.blocking || self.reject_threshold.is_some_and(|min| threat.severity >= min)
    }

    fn log_threat(&self, threat: &Threat, ctx: &RequestContext, request_id: Option<&str>, user_id: Option<&str>) {
        metrics::record_threat(threat);
        let mut event = SecurityEvent::from_threat(threat, ctx).with_user(user_id);
        if let Some(id) = request_id {
            event = event.with_meta("request_id", id);
        }
        let _ = self.events.log_security_event(event);
    }

    /// Actor from request extensions, response extensions, then (when
    /// trusted) identity headers.
    fn resolve_actor(&self, request: Option<Actor>, response: &Response, headers: &HeaderMap) -> Option<Actor> {
        request
            .or_else(|| response.extensions().get::<Actor>().cloned())
            .or_else(|| self.actor_from_headers(headers))
            .or_else(|| self.actor_from_headers(response.headers()))
    }

    fn actor_from_headers(&self, headers: &HeaderMap) -> Option<Actor> {
        if !self.identity.trust_headers {
            return None;
        }
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let user_id = header(&self.identity.user_id_header)?;
        Some(Actor::new(user_id, header(&self.identity.email_header)))
    }
}

fn peer_addr(parts: &Parts) -> Option<IpAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| {
            parts
                .extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| addr.ip())
        })
}

/// Interception middleware, installed with `from_fn_with_state`.
pub async fn security_middleware(
    State(layer): State<SecurityLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let ip = layer.resolver.resolve(&parts.headers, peer_addr(&parts));
    let ctx = request_context(&parts, &ip);
    let request_id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request_actor = parts.extensions.get::<Actor>().cloned();
    let user_id = request_actor.as_ref().map(|a| a.user_id.as_str());

    // Blocked IPs are rejected before anything is read or analyzed.
    if layer.tracker.is_blocked(&ip) {
        let threat = Threat::new(
            SecurityEventType::IpBlacklisted,
            Severity::Critical,
            "Request from blocked IP",
        );
        layer.log_threat(&threat, &ctx, request_id.as_deref(), user_id);
        metrics::record_verdict(Verdict::Blocked);
        return response::access_denied();
    }

    let bytes = match axum::body::to_bytes(body, layer.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(ip = %ip, error = %e, "Request body rejected");
            metrics::record_verdict(Verdict::TooLarge);
            return response::payload_too_large();
        }
    };
    let inspected = inspect(&parts, &bytes);

    let mut threats: Vec<Threat> = layer.tracker.check_request_rate(&ip).into_iter().collect();
    threats.extend(layer.analyzer.analyze(&inspected));

    let mut reject = false;
    for threat in &threats {
        layer.log_threat(threat, &ctx, request_id.as_deref(), user_id);
        reject |= layer.rejects(threat);
    }
    if reject {
        metrics::record_verdict(Verdict::Rejected);
        return response::access_denied();
    }

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let headers = parts.headers.clone();
    let response = next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await;
    let status = response.status();

    if method == Method::POST
        && path == layer.audit_config.login_path
        && matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    {
        let username = login_username(inspected.body.as_ref());
        let threat = layer.tracker.track_failed_login(&ip, username.as_deref());
        layer.log_threat(&threat, &ctx, request_id.as_deref(), None);
    }

    if layer.audit_config.enabled {
        if let Some(route) = layer.routes.match_route(&method, &path) {
            match layer.resolve_actor(request_actor, &response, &headers) {
                Some(actor) => {
                    let mut entry = AuditLogEntry::new(
                        &actor,
                        route.action,
                        format!("{} via {} {}", route.action, method, path),
                    )
                    .resource(route.resource_type, route.resource_id)
                    .context(&ctx)
                    .outcome(Outcome::from_status(status.as_u16()))
                    .with_meta("status", status.as_u16());
                    if let Some(id) = &request_id {
                        entry = entry.with_meta("request_id", id.as_str());
                    }
                    let _ = layer.audit.log(entry);
                }
                None => {
                    tracing::debug!(path = %path, action = %route.action, "Sensitive route without actor, not audited");
                }
            }
        }
    }

    metrics::record_verdict(Verdict::Passed);
    response
}
