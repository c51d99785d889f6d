//! Integration Tests for API Endpoints
//!
//! Tests the full request/response cycle for each operator endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use resilient_cache::{api::create_router, AppState, UpstreamError};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> (Router, AppState) {
    let state = AppState::in_memory(100);
    (create_router(state.clone()), state)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// == SET / GET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let (app, _) = create_test_app();

    let (status, json) = send(
        &app,
        "PUT",
        "/cache/vitals/lcp",
        Some(r#"{"value":{"p75":2100}}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("lcp"));
    assert_eq!(json["namespace"], "vitals");
}

#[tokio::test]
async fn test_get_endpoint_success() {
    let (app, _) = create_test_app();
    send(
        &app,
        "PUT",
        "/cache/analytics/daily",
        Some(r#"{"value":[1,2,3],"ttl":60}"#),
    )
    .await;

    let (status, json) = send(&app, "GET", "/cache/analytics/daily", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], serde_json::json!([1, 2, 3]));
    assert_eq!(json["key"], "daily");
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let (app, _) = create_test_app();

    let (status, json) = send(&app, "GET", "/cache/default/missing", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_same_key_isolated_by_namespace() {
    let (app, _) = create_test_app();
    send(&app, "PUT", "/cache/analytics/k", Some(r#"{"value":"a"}"#)).await;
    send(&app, "PUT", "/cache/vitals/k", Some(r#"{"value":"v"}"#)).await;

    let (_, analytics) = send(&app, "GET", "/cache/analytics/k", None).await;
    let (_, vitals) = send(&app, "GET", "/cache/vitals/k", None).await;

    assert_eq!(analytics["value"], "a");
    assert_eq!(vitals["value"], "v");
}

// == DELETE / FLUSH Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint_success() {
    let (app, _) = create_test_app();
    send(&app, "PUT", "/cache/default/gone", Some(r#"{"value":true}"#)).await;

    let (status, json) = send(&app, "DELETE", "/cache/default/gone", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("gone"));

    let (status, _) = send(&app, "GET", "/cache/default/gone", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_endpoint_not_found() {
    let (app, _) = create_test_app();

    let (status, _) = send(&app, "DELETE", "/cache/default/never", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_flush_namespace_endpoint() {
    let (app, _) = create_test_app();
    send(&app, "PUT", "/cache/analytics/a", Some(r#"{"value":1}"#)).await;
    send(&app, "PUT", "/cache/analytics/b", Some(r#"{"value":2}"#)).await;
    send(&app, "PUT", "/cache/vitals/a", Some(r#"{"value":3}"#)).await;

    let (status, json) = send(&app, "DELETE", "/cache/analytics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["namespace"], "analytics");

    let (a, _) = send(&app, "GET", "/cache/analytics/a", None).await;
    let (b, _) = send(&app, "GET", "/cache/analytics/b", None).await;
    let (other, _) = send(&app, "GET", "/cache/vitals/a", None).await;
    assert_eq!(a, StatusCode::NOT_FOUND);
    assert_eq!(b, StatusCode::NOT_FOUND);
    assert_eq!(other, StatusCode::OK);
}

// == STATS / HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, _) = create_test_app();
    send(&app, "PUT", "/cache/default/s", Some(r#"{"value":1}"#)).await;
    send(&app, "GET", "/cache/default/s", None).await;
    send(&app, "GET", "/cache/default/nope", None).await;

    let (status, json) = send(&app, "GET", "/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["writes"], 1);
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["cache_ready"], true);
    assert!(json.get("timestamp").is_some());
}

#[tokio::test]
async fn test_health_reports_open_breaker() {
    let (app, state) = create_test_app();
    let breaker = state.breakers.get_or_create("payments");
    for _ in 0..5 {
        let _ = breaker
            .execute(|| async { Err::<(), _>(UpstreamError::from_status(503, "down")) })
            .await;
    }

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["open_breakers"], serde_json::json!(["payments"]));
}

// == BREAKER Endpoint Tests ==

#[tokio::test]
async fn test_breakers_endpoint_and_reset() {
    let (app, state) = create_test_app();
    let breaker = state.breakers.get_or_create("identity");
    for _ in 0..5 {
        let _ = breaker
            .execute(|| async { Err::<(), _>(UpstreamError::new("connection reset")) })
            .await;
    }

    let (status, json) = send(&app, "GET", "/breakers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["breakers"][0]["name"], "identity");
    assert_eq!(json["breakers"][0]["state"], "OPEN");

    let (status, json) = send(&app, "POST", "/breakers/identity/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "CLOSED");
    assert_eq!(json["consecutive_failures"], 0);

    let (status, _) = send(&app, "POST", "/breakers/unknown/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let (app, _) = create_test_app();

    let (status, _) = send(&app, "PUT", "/cache/default/k", Some(r#"{"invalid json"#)).await;

    // Axum returns 400 or 422 for JSON parsing errors
    assert!(status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_oversized_key_request() {
    let (app, _) = create_test_app();
    let uri = format!("/cache/default/{}", "k".repeat(300));

    let (status, json) = send(&app, "PUT", &uri, Some(r#"{"value":"test"}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_zero_ttl_rejected() {
    let (app, _) = create_test_app();

    let (status, _) = send(&app, "PUT", "/cache/default/k", Some(r#"{"value":1,"ttl":0}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_namespace_is_service_unavailable() {
    let (app, _) = create_test_app();

    let (status, _) = send(&app, "PUT", "/cache/a:b/k", Some(r#"{"value":1}"#)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// == TTL Expiration Test ==

#[tokio::test]
async fn test_ttl_expiration_via_api() {
    let (app, _) = create_test_app();
    send(
        &app,
        "PUT",
        "/cache/default/short",
        Some(r#"{"value":"temp","ttl":1}"#),
    )
    .await;

    let (status, _) = send(&app, "GET", "/cache/default/short", None).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let (status, _) = send(&app, "GET", "/cache/default/short", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
