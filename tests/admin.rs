//! Admin API tests: authentication, IP management and query filters.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use fundguard::admin::setup_admin_router;
use fundguard::security::types::{Actor, RequestContext, SecurityEventType, Severity};
use fundguard::sinks::taxonomy::ProjectAction;
use fundguard::sinks::{AuditLogEntry, SecurityEvent};

mod common;
use common::{build_guard, eventually, test_config, TestGuard};

const KEY: &str = "test-admin-key";

fn admin(t: &TestGuard) -> Router {
    setup_admin_router(t.guard.admin_state())
}

fn guard() -> TestGuard {
    let mut config = test_config();
    config.admin.api_key = KEY.to_string();
    build_guard(config)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {KEY}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_requires_bearer_key() {
    let t = guard();

    let response = admin(&t)
        .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = admin(&t)
        .oneshot(
            Request::builder()
                .uri("/admin/status")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = admin(&t).oneshot(get("/admin/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "operational");
    assert_eq!(body["blocked_ips"], 0);
}

#[tokio::test]
async fn test_block_and_unblock_are_recorded() {
    let t = guard();

    let response = admin(&t)
        .oneshot(post_json(
            "/admin/security/block",
            json!({
                "ip": "203.0.113.50",
                "reason": "card testing",
                "actor": { "user_id": "admin-1", "email": "admin@fund.example" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["changed"], true);
    assert!(t.guard.tracker.is_blocked("203.0.113.50"));

    let response = admin(&t).oneshot(get("/admin/security/ips")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["blocked"], json!(["203.0.113.50"]));

    let response = admin(&t)
        .oneshot(post_json("/admin/security/unblock", json!({ "ip": "203.0.113.50" })))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["changed"], true);
    assert!(!t.guard.tracker.is_blocked("203.0.113.50"));

    assert!(eventually(|| t.store.event_count() == 2 && t.store.audit_count() == 1).await);

    let response = admin(&t)
        .oneshot(get("/admin/security/events?type=IP_BLOCKED"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["severity"], "HIGH");
    assert_eq!(body["items"][0]["user_id"], "admin-1");
    assert_eq!(body["items"][0]["metadata"]["reason"], "card testing");

    let response = admin(&t)
        .oneshot(get("/admin/audit/logs?category=ADMIN"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["action"], "SECURITY_CHANGE");
    assert_eq!(body["items"][0]["resource_id"], "203.0.113.50");
}

#[tokio::test]
async fn test_invalid_ip_is_rejected() {
    let t = guard();
    let response = admin(&t)
        .oneshot(post_json("/admin/security/block", json!({ "ip": "not-an-ip" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!t.guard.tracker.snapshot().blocked.iter().any(|ip| ip == "not-an-ip"));
}

#[tokio::test]
async fn test_event_filters_and_stats() {
    let t = guard();
    let events = t.guard.layer.events();
    for (ip, kind, severity) in [
        ("10.0.0.1", SecurityEventType::SqlInjection, Severity::Critical),
        ("10.0.0.1", SecurityEventType::XssAttempt, Severity::High),
        ("10.0.0.2", SecurityEventType::SqlInjection, Severity::Critical),
    ] {
        let _ = events.log_security_event(SecurityEvent::new(
            kind,
            severity,
            "test",
            &RequestContext::for_ip(ip),
        ));
    }
    assert!(eventually(|| t.store.event_count() == 3).await);

    let response = admin(&t)
        .oneshot(get("/admin/security/events?severity=CRITICAL&limit=1"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["limit"], 1);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let response = admin(&t)
        .oneshot(get("/admin/security/events?ip=10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["total"], 2);

    let response = admin(&t).oneshot(get("/admin/security/stats")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["unique_ips"], 2);
    assert_eq!(body["top_ips"][0]["ip"], "10.0.0.1");

    let response = admin(&t)
        .oneshot(get("/admin/security/events?severity=SEVERE"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_filters_and_stats() {
    let t = guard();
    let audit = t.guard.layer.audit();
    let actor = Actor::new("owner-3", None);
    let _ = audit.log(
        AuditLogEntry::new(&actor, ProjectAction::Created, "created").resource("project", Some("p-1".into())),
    );
    let _ = audit.log(
        AuditLogEntry::new(&actor, ProjectAction::Updated, "updated").resource("project", Some("p-2".into())),
    );
    assert!(eventually(|| t.store.audit_count() == 2).await);

    let response = admin(&t)
        .oneshot(get("/admin/audit/logs?resource_type=project&resource_id=p-2"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["action"], "PROJECT_UPDATED");

    let response = admin(&t)
        .oneshot(get("/admin/audit/logs?user_id=owner-3&status=success"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["total"], 2);

    let response = admin(&t).oneshot(get("/admin/audit/stats")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["by_category"]["PROJECT"]["success"], 2);
}
