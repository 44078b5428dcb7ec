//! Integration Tests for the admin API
//!
//! Tests the full request/response cycle for each endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use edge_cache::{
    api::create_router,
    cache::{CacheStore, ContentEntry, MemoryStore},
    AppState, Stats,
};
use serde_json::Value;
use tower::ServiceExt;

const RESOURCE: &str = "http://www.example.com/style.css";

// == Helper Functions ==

async fn create_test_app() -> (Router, Arc<MemoryStore>) {
    let stats = Arc::new(Stats::new());
    let cache = Arc::new(MemoryStore::new(Default::default(), stats.clone()));
    cache
        .store(
            RESOURCE,
            ContentEntry::new("body { margin: 0 }", "text/css", HashMap::new(), 600, 1),
        )
        .await
        .unwrap();

    let app = create_router(AppState::new(cache.clone(), stats, "memory"));
    (app, cache)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn purge_request(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/purge")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

// == Purge Endpoint Tests ==

#[tokio::test]
async fn test_purge_endpoint_success() {
    let (app, cache) = create_test_app().await;

    let response = app
        .oneshot(purge_request(
            r#"{"resource":"http://www.example.com/style.css"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["message"], "successfully purged item from cache");

    assert!(cache.lookup(RESOURCE).await.unwrap().is_none());
    assert_eq!(cache.current_size().await, 0);
}

#[tokio::test]
async fn test_purge_endpoint_not_found() {
    let (app, cache) = create_test_app().await;

    let response = app
        .oneshot(purge_request(
            r#"{"resource":"http://www.example.com/missing.css"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("not found"));

    assert!(cache.lookup(RESOURCE).await.unwrap().is_some());
}

#[tokio::test]
async fn test_purge_endpoint_invalid_json() {
    let (app, _) = create_test_app().await;

    let response = app
        .oneshot(purge_request(r#"{"resource""#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["message"], "unable to parse purge request");
}

#[tokio::test]
async fn test_purge_endpoint_missing_field() {
    let (app, _) = create_test_app().await;

    let response = app.oneshot(purge_request(r#"{"url":"x"}"#)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_purge_endpoint_method_not_allowed() {
    let (app, _) = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/purge")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, cache) = create_test_app().await;

    cache.lookup(RESOURCE).await.unwrap();
    cache.lookup("http://www.example.com/missing.css").await.unwrap();

    let response = app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["stores"], 1);
    assert_eq!(json["hit_rate"], 0.5);
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
}
