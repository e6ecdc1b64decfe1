//! HTTP middleware integration tests driving a real axum router.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use eucharist_cache::{
    cache_middleware, generate_user_cache_key, CacheConfig, CacheService, HttpCacheConfig,
    InMemoryStore, KeyValueStore,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[derive(Clone)]
struct Hits(Arc<AtomicUsize>);

async fn counted(State(hits): State<Hits>) -> Json<Value> {
    let count = hits.0.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "count": count }))
}

async fn counted_not_found(State(hits): State<Hits>) -> impl IntoResponse {
    let count = hits.0.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "missing", "attempt": count })),
    )
}

async fn counted_error(State(hits): State<Hits>) -> impl IntoResponse {
    hits.0.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "boom" })),
    )
}

async fn counted_with_header(State(hits): State<Hits>) -> impl IntoResponse {
    let count = hits.0.fetch_add(1, Ordering::SeqCst) + 1;
    ([("x-demo", "yes")], Json(json!({ "count": count })))
}

fn test_app(cache: Arc<CacheService>, config: HttpCacheConfig) -> (Router, Hits) {
    let hits = Hits(Arc::new(AtomicUsize::new(0)));
    let app = Router::new()
        .route("/api/search", get(counted))
        .route(
            "/api/items",
            get(counted).post(counted).put(counted).delete(counted),
        )
        .route("/api/missing", get(counted_not_found))
        .route("/api/broken", get(counted_error))
        .route("/api/tagged", get(counted_with_header))
        .layer(cache_middleware(cache, config))
        .with_state(hits.clone());
    (app, hits)
}

fn test_cache() -> (Arc<CacheService>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(CacheService::new(store.clone(), CacheConfig::default()));
    (cache, store)
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// The cache write after a miss is a detached task; give it a moment.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn search_results_are_cached_per_query() {
    let (cache, _store) = test_cache();
    let (app, hits) = test_app(cache, HttpCacheConfig::default());

    let (status, body) = send(&app, "GET", "/api/search?q=test1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "count": 1 }));
    settle().await;

    let (_, body) = send(&app, "GET", "/api/search?q=test2").await;
    assert_eq!(body, json!({ "count": 2 }));
    settle().await;

    // Same query again: served from cache, handler not re-invoked.
    let (status, body) = send(&app, "GET", "/api/search?q=test1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "count": 1 }));

    assert_eq!(hits.0.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn only_get_requests_touch_the_cache() {
    let (cache, _store) = test_cache();
    let (app, hits) = test_app(cache, HttpCacheConfig::default());

    send(&app, "GET", "/api/items").await;
    settle().await;
    send(&app, "GET", "/api/items").await;
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);

    for method in ["POST", "PUT", "DELETE"] {
        let before = hits.0.load(Ordering::SeqCst);
        send(&app, method, "/api/items").await;
        settle().await;
        send(&app, method, "/api/items").await;
        settle().await;
        assert_eq!(hits.0.load(Ordering::SeqCst), before + 2, "{method} was cached");
    }
}

#[tokio::test]
async fn non_success_responses_are_never_cached() {
    let (cache, _store) = test_cache();
    let (app, hits) = test_app(cache, HttpCacheConfig::default());

    for attempt in 1..=3u64 {
        let (status, body) = send(&app, "GET", "/api/missing").await;
        settle().await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["attempt"], json!(attempt));
    }
    assert_eq!(hits.0.load(Ordering::SeqCst), 3);

    send(&app, "GET", "/api/broken").await;
    settle().await;
    let (status, _) = send(&app, "GET", "/api/broken").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hits.0.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn store_outage_is_invisible_to_clients() {
    let (cache, store) = test_cache();
    let (app, hits) = test_app(cache, HttpCacheConfig::default());

    store.disconnect();

    for count in 1..=3u64 {
        let (status, body) = send(&app, "GET", "/api/search?q=x").await;
        settle().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "count": count }));
    }
    assert_eq!(hits.0.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn query_order_does_not_fragment_the_cache() {
    let (cache, _store) = test_cache();
    let (app, hits) = test_app(cache, HttpCacheConfig::default());

    send(&app, "GET", "/api/search?z=1&a=2").await;
    settle().await;
    let (_, body) = send(&app, "GET", "/api/search?a=2&z=1").await;

    assert_eq!(body, json!({ "count": 1 }));
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_key_generator_controls_the_key() {
    let (cache, _store) = test_cache();
    let config =
        HttpCacheConfig::default().with_key_generator(|req| req.uri().path().to_string());
    let (app, hits) = test_app(cache, config);

    // Keyed on path alone, differing queries share one entry.
    send(&app, "GET", "/api/search?q=first").await;
    settle().await;
    let (_, body) = send(&app, "GET", "/api/search?q=second").await;

    assert_eq!(body, json!({ "count": 1 }));
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn user_scoped_keys_default_to_anonymous() {
    let (cache, store) = test_cache();
    let config = HttpCacheConfig::default().with_key_generator(|req| generate_user_cache_key(req));
    let (app, _hits) = test_app(cache, config);

    send(&app, "GET", "/api/search?q=me").await;
    settle().await;

    let keys = store.scan("api:user:anonymous:*").await.unwrap();
    assert_eq!(keys, vec!["api:user:anonymous:/api/search?q=me".to_string()]);
}

#[tokio::test]
async fn cache_hits_replay_captured_headers() {
    let (cache, _store) = test_cache();
    let (app, hits) = test_app(cache, HttpCacheConfig::default());

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/tagged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.headers().get("x-demo").unwrap(), "yes");
    settle().await;

    let second = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/tagged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-demo").unwrap(), "yes");
    assert_eq!(hits.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn middleware_and_service_namespaces_stay_separate() {
    let (cache, store) = test_cache();
    let (app, _hits) = test_app(cache.clone(), HttpCacheConfig::default());

    cache
        .set("/api/search?q=test1", "service-level", Default::default())
        .await;
    send(&app, "GET", "/api/search?q=test1").await;
    settle().await;

    // One entry under each prefix for the same logical key.
    assert_eq!(store.scan("eucharist:*").await.unwrap().len(), 1);
    assert_eq!(store.scan("api:*").await.unwrap().len(), 1);
}
