//! Gateway tests over real sockets: guard in front of a mock upstream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fundguard::config::GuardConfig;
use fundguard::http::GuardServer;
use fundguard::security::types::SecurityEventType;
use fundguard::sinks::EventFilter;

mod common;
use common::{build_guard, eventually, test_config, MockRequest, TestGuard, BROWSER_UA};

async fn start_guard(config: GuardConfig) -> (SocketAddr, TestGuard) {
    let t = build_guard(config);
    let server = GuardServer::new(&t.guard.config, t.guard.layer.clone()).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = t.shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, t)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .user_agent(BROWSER_UA)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_clean_request_is_forwarded_with_request_id() {
    let seen: Arc<Mutex<Vec<MockRequest>>> = Arc::default();
    let record = seen.clone();
    let upstream = common::start_programmable_backend(move |req| {
        let record = record.clone();
        async move {
            record.lock().unwrap().push(req);
            (200, r#"{"projects":[]}"#.to_string())
        }
    })
    .await;

    let mut config = test_config();
    config.upstream.address = upstream.to_string();
    let (addr, _t) = start_guard(config).await;

    let res = client()
        .post(format!("http://{addr}/api/projects?draft=true"))
        .json(&serde_json::json!({ "title": "Solar roofs for schools" }))
        .send()
        .await
        .expect("guard unreachable");
    assert_eq!(res.status(), 200);
    let request_id = res
        .headers()
        .get("x-request-id")
        .expect("request id propagated to client")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(res.text().await.unwrap(), r#"{"projects":[]}"#);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/api/projects?draft=true");
    assert_eq!(seen[0].header("x-request-id"), Some(request_id.as_str()));
    assert_eq!(seen[0].body, r#"{"title":"Solar roofs for schools"}"#);
}

#[tokio::test]
async fn test_blocked_ip_never_reaches_upstream() {
    let seen: Arc<Mutex<usize>> = Arc::default();
    let count = seen.clone();
    let upstream = common::start_programmable_backend(move |_| {
        let count = count.clone();
        async move {
            *count.lock().unwrap() += 1;
            (200, "{}".to_string())
        }
    })
    .await;

    let mut config = test_config();
    config.upstream.address = upstream.to_string();
    let (addr, t) = start_guard(config).await;
    t.guard.tracker.block_ip("127.0.0.1");

    let res = client()
        .get(format!("http://{addr}/api/projects"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "error": "Access denied" }));
    assert_eq!(*seen.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_forwarded_client_ip_from_trusted_proxy() {
    let upstream = common::start_mock_backend("{}").await;
    let mut config = test_config();
    config.upstream.address = upstream.to_string();
    let (addr, t) = start_guard(config).await;
    t.guard.tracker.block_ip("203.0.113.9");

    // Loopback is a trusted proxy by default, so the header is honoured;
    // the client-supplied prefix is not.
    let res = client()
        .get(format!("http://{addr}/api/projects"))
        .header("x-forwarded-for", "10.0.0.1, 203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    let res = client()
        .get(format!("http://{addr}/api/projects"))
        .header("x-forwarded-for", "203.0.113.10")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    assert!(eventually(|| t.store.event_count() == 1).await);
    let page = t
        .guard
        .layer
        .events()
        .query(&EventFilter {
            ip: Some("203.0.113.9".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.items[0].event_type, SecurityEventType::IpBlacklisted);
}

#[tokio::test]
async fn test_upstream_down_is_bad_gateway() {
    // Bind then drop to get a port nothing listens on.
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let mut config = test_config();
    config.upstream.address = unused.to_string();
    let (addr, _t) = start_guard(config).await;

    let res = client()
        .get(format!("http://{addr}/api/projects"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn test_upstream_login_failure_is_tracked() {
    let upstream = common::start_programmable_backend(|req| async move {
        if req.path == "/api/auth/login" {
            (401, r#"{"error":"invalid credentials"}"#.to_string())
        } else {
            (200, "{}".to_string())
        }
    })
    .await;

    let mut config = test_config();
    config.upstream.address = upstream.to_string();
    config.tracker.failed_login_threshold = 1;
    config.tracker.brute_force_threshold = 2;
    let (addr, t) = start_guard(config).await;

    for _ in 0..2 {
        let res = client()
            .post(format!("http://{addr}/api/auth/login"))
            .form(&[("username", "alice"), ("password", "nope")])
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 401);
    }
    assert!(t.guard.tracker.is_blocked("127.0.0.1"));
    assert_eq!(t.guard.tracker.attempted_usernames("127.0.0.1"), vec!["alice".to_string()]);

    let res = client()
        .get(format!("http://{addr}/api/projects"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
}
