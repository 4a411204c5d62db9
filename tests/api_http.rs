// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use axum::{
    body::{self, Body},
    Router,
};
use http::{Request, StatusCode};
use serde_json::Value as Json;
use std::sync::Arc;
use tower::ServiceExt as _; // for `oneshot`

use retro_feeds::api::{create_router, AppState, CACHE_HEADER};
use retro_feeds::cache::store::MemoryStore;
use retro_feeds::cache::{FeedCache, DEFAULT_TTL};
use retro_feeds::clock::ManualClock;
use retro_feeds::ingest::{Aggregator, PipelineSettings};

mod common;
use common::{pinned_now, raw_item, test_catalog, Behavior, StubFetcher, SRC_A, SRC_B, SRC_C};

const BODY_LIMIT: usize = 1024 * 1024;

fn test_router(fetcher: Arc<StubFetcher>) -> Router {
    let clock = Arc::new(ManualClock::new(pinned_now()));
    let catalog = Arc::new(test_catalog());
    let agg = Aggregator::new(catalog.clone(), fetcher, PipelineSettings::default())
        .with_clock(clock.clone());
    let cache = FeedCache::new(Arc::new(agg), Arc::new(MemoryStore::new()), DEFAULT_TTL)
        .with_clock(clock);
    create_router(AppState {
        cache: Arc::new(cache),
        catalog,
    })
}

fn healthy_fetcher() -> Arc<StubFetcher> {
    Arc::new(
        StubFetcher::new()
            .with(SRC_A, Behavior::Items(vec![raw_item(SRC_A, "a1", 4)]))
            .with(SRC_B, Behavior::Items(vec![raw_item(SRC_B, "b1", 8)]))
            .with(SRC_C, Behavior::Fail),
    )
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Option<String>, Json) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let cache = resp
        .headers()
        .get(CACHE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, cache, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_router(healthy_fetcher());
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn catalog_lists_categories_and_subcategories() {
    let app = test_router(healthy_fetcher());
    let (status, _, json) = send(&app, "GET", "/catalog").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["category"], "tech");
    assert_eq!(json[0]["subcategories"][1], "gadgets");
    assert_eq!(json[1]["category"], "news");
}

#[tokio::test]
async fn feed_route_reports_miss_then_hit() {
    let fetcher = healthy_fetcher();
    let app = test_router(fetcher.clone());

    let (status, cache, json) = send(&app, "GET", "/feeds/tech/ai-machine-learning").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert_eq!(json["category"], "tech");
    assert_eq!(json["subcategory"], "ai-machine-learning");
    assert_eq!(json["itemCount"], 2);
    assert_eq!(json["items"][0]["identityKey"], "a1");
    assert_eq!(json["items"][0]["sourceName"], "Alpha Wire");
    assert_eq!(json["items"][0]["relativeTime"], "4 minutes ago");

    let (_, cache, again) = send(&app, "GET", "/feeds/tech/ai-machine-learning").await;
    assert_eq!(cache.as_deref(), Some("HIT"));
    assert_eq!(again, json);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn failing_feed_is_still_200_with_empty_marker() {
    let app = test_router(healthy_fetcher());
    let (status, cache, json) = send(&app, "GET", "/feeds/tech/gadgets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("EMPTY"));
    assert_eq!(json["itemCount"], 0);
    assert!(json["note"].is_string());
}

#[tokio::test]
async fn invalidate_forces_refetch() {
    let fetcher = healthy_fetcher();
    let app = test_router(fetcher.clone());

    send(&app, "GET", "/feeds/news").await;
    let (status, _, json) = send(&app, "POST", "/admin/invalidate/news").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["invalidated"], "news");

    let (_, cache, _) = send(&app, "GET", "/feeds/news").await;
    assert_eq!(cache.as_deref(), Some("MISS"));

    let (_, _, json) = send(&app, "POST", "/admin/invalidate-all").await;
    assert_eq!(json["invalidated"], "*");
    let (_, cache, _) = send(&app, "GET", "/feeds/news").await;
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert_eq!(fetcher.calls(), 3);
}
