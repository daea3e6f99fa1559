//! End-to-end tests of the HTTP surface against an in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use median_store::{
    server::{create_router, AppState},
    settings::Settings,
    store::MemoryStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tracing_test::traced_test;

fn app() -> Router {
    let state = AppState::new(Arc::new(MemoryStore::new()));
    create_router(state, &Settings::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn json_of(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
#[traced_test]
async fn test_append_then_median_and_export() {
    let app = app();

    let (status, body) = send(&app, post_json("/append?seed_id=s1", json!({"values": [1.0, 3.0]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"status": "ok", "appended": 2, "count": 2}));

    let (_, body) = send(&app, post_json("/append?seed_id=s1", json!({"values": [2.0, 4.0]}))).await;
    assert_eq!(json_of(&body)["count"], 4);

    let (status, body) = send(&app, get("/median?seed_id=s1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"median": 2.5}));

    let (status, body) = send(&app, get("/export?seed_id=s1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_of(&body),
        json!({"seed_id": "s1", "count": 4, "values": [1.0, 3.0, 2.0, 4.0]})
    );
}

#[tokio::test]
#[traced_test]
async fn test_export_as_csv() {
    let app = app();
    send(&app, post_json("/append?seed_id=c", json!({"values": [1.5, -2.0]}))).await;

    let response = app.clone().oneshot(get("/export?seed_id=c&format=csv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"value\n1.5\n-2\n");
}

#[tokio::test]
#[traced_test]
async fn test_session_variant_shares_the_store() {
    let app = app();

    let (status, body) = send(&app, post_json("/add", json!({"session_id": "u", "values": [5.0]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"status": "ok", "count": 1}));

    let (status, body) = send(&app, get("/median?session_id=u")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["median"], 5.0);

    let (status, body) = send(&app, post_json("/clear?session_id=u", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"status": "cleared"}));
}

#[tokio::test]
#[traced_test]
async fn test_error_statuses() {
    let app = app();

    let (status, body) = send(&app, post_json("/append?seed_id=e", json!({"values": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_of(&body)["detail"].as_str().unwrap().contains("empty"));

    let (status, _) = send(&app, get("/median?seed_id=missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/export?seed_id=missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // key parameter is required
    let (status, _) = send(&app, get("/median")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[traced_test]
async fn test_clear_always_succeeds() {
    let app = app();
    send(&app, post_json("/append?seed_id=x", json!({"values": [1.0]}))).await;

    for _ in 0..2 {
        let request = Request::post("/clear?seed_id=x").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({"status": "cleared"}));
    }

    let (status, _) = send(&app, get("/median?seed_id=x")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[traced_test]
async fn test_health_reports_key_count() {
    let app = app();
    send(&app, post_json("/append?seed_id=a", json!({"values": [1.0]}))).await;
    send(&app, post_json("/append?seed_id=b", json!({"values": [1.0]}))).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health = json_of(&body);
    assert_eq!(health["status"], "alive");
    assert_eq!(health["backend"], "in_memory");
    assert_eq!(health["keys"], 2);
}

#[tokio::test]
#[traced_test]
async fn test_rate_limit_applies_when_configured() {
    let mut settings = Settings::default();
    settings.server.rate_limit_per_minute = 1;
    let app = create_router(AppState::new(Arc::new(MemoryStore::new())), &settings);

    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
#[traced_test]
async fn test_median_of_extreme_values_is_a_number() {
    let app = app();

    let (status, _) = send(&app, post_json("/append?seed_id=big", json!({"values": [f64::MAX, f64::MAX]}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/median?seed_id=big")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["median"], f64::MAX);
}
