//! The HTTP surface, driven through the router without a socket.

use std::sync::Arc;
use std::time::Duration;

use apollo::{Core, Dispatcher, ServerConfig, SessionResponse, router};
use apollo_bus::Bus;
use apollo_protocol::{Destination, Packet, Scope, SessionToken};
use apollo_session::MemoryStore;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

fn core(ready: bool) -> Arc<Core<MemoryStore>> {
    let config = ServerConfig {
        poll_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let bus = Bus::connect(&config.broker).unwrap();
    if ready {
        bus.mark_ready();
    }
    Arc::new(Core::new(
        config,
        Arc::new(MemoryStore::new()),
        bus,
        Dispatcher::with_defaults(),
    ))
}

async fn open_session(core: &Arc<Core<MemoryStore>>) -> SessionResponse {
    let req = Request::builder().uri("/session").body(Body::empty()).unwrap();
    let resp = router(core.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn action(token: &str, packet: &str) -> Request<Body> {
    let form = format!("s={}&p={}", token, urlencode(packet));
    Request::builder()
        .method("POST")
        .uri("/action")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap()
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

// =========================================================================
// GET /session
// =========================================================================

#[tokio::test]
async fn test_session_returns_token_and_nonce() {
    let core = core(true);
    let session = open_session(&core).await;

    assert!(!session.s.is_empty());
    assert_eq!(session.n.len(), 64);
    assert!(core.transport(&SessionToken::new(session.s)).await.is_some());
}

#[tokio::test]
async fn test_session_unavailable_before_bus_ready() {
    let core = core(false);
    let req = Request::builder().uri("/session").body(Body::empty()).unwrap();
    let resp = router(core).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// =========================================================================
// POST /action
// =========================================================================

#[tokio::test]
async fn test_action_unknown_session_is_not_found() {
    let core = core(true);
    let resp = router(core)
        .oneshot(action("missing", r#"{"__name__":"online"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_action_malformed_packet_is_bad_request() {
    let core = core(true);
    let session = open_session(&core).await;
    let resp = router(core)
        .oneshot(action(&session.s, "{oops"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_action_accepted_with_no_content() {
    let core = core(true);
    let session = open_session(&core).await;
    let resp = router(core)
        .oneshot(action(&session.s, r#"{"__name__":"teleport"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

// =========================================================================
// GET /events
// =========================================================================

#[tokio::test]
async fn test_events_receives_published_packet() {
    let core = core(true);
    let session = open_session(&core).await;
    let token = SessionToken::new(session.s.clone());

    let app = router(core.clone());
    let req = Request::builder()
        .uri(format!("/events?s={}", session.s))
        .body(Body::empty())
        .unwrap();
    let poll = tokio::spawn(app.oneshot(req));

    tokio::time::sleep(Duration::from_millis(20)).await;
    core.bus()
        .publish(&Destination::ex(Scope::Session(token)), &Packet::new("chat").with("msg", "hi"))
        .await
        .unwrap();

    let resp = poll.await.unwrap().unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["__name__"], "chat");
    assert_eq!(parsed["msg"], "hi");
}

#[tokio::test]
async fn test_events_times_out_with_no_content() {
    let core = core(true);
    let session = open_session(&core).await;

    let req = Request::builder()
        .uri(format!("/events?s={}", session.s))
        .body(Body::empty())
        .unwrap();
    let resp = router(core).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_events_unknown_session_is_not_found() {
    let core = core(true);
    let req = Request::builder()
        .uri("/events?s=missing")
        .body(Body::empty())
        .unwrap();
    let resp = router(core).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
