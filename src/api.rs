use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::cache::{CacheOutcome, FeedCache};
use crate::catalog::Catalog;
use crate::ingest::abort::AbortSignal;
use crate::ingest::types::FeedBundle;

pub const CACHE_HEADER: &str = "x-feed-cache";

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FeedCache>,
    pub catalog: Arc<Catalog>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/catalog", get(list_catalog))
        .route("/feeds/{category}", get(feed_for_category))
        .route("/feeds/{category}/{subcategory}", get(feed_for_subcategory))
        .route("/admin/invalidate/{category}", post(invalidate_category))
        .route("/admin/invalidate-all", post(invalidate_all))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct CatalogOut {
    category: String,
    subcategories: Vec<String>,
}

async fn list_catalog(State(state): State<AppState>) -> Json<Vec<CatalogOut>> {
    let out = state
        .catalog
        .categories()
        .iter()
        .map(|c| CatalogOut {
            category: c.name.clone(),
            subcategories: c.subcategories.iter().map(|s| s.name.clone()).collect(),
        })
        .collect();
    Json(out)
}

fn bundle_response(bundle: FeedBundle, outcome: CacheOutcome) -> impl IntoResponse {
    ([(CACHE_HEADER, outcome.as_header())], Json(bundle))
}

async fn feed_for_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> impl IntoResponse {
    let (bundle, outcome) = state
        .cache
        .get_or_fetch_traced(&category, None, &AbortSignal::never())
        .await;
    bundle_response(bundle, outcome)
}

async fn feed_for_subcategory(
    State(state): State<AppState>,
    Path((category, subcategory)): Path<(String, String)>,
) -> impl IntoResponse {
    let (bundle, outcome) = state
        .cache
        .get_or_fetch_traced(&category, Some(&subcategory), &AbortSignal::never())
        .await;
    bundle_response(bundle, outcome)
}

#[derive(serde::Serialize)]
struct InvalidatedOut {
    invalidated: String,
}

async fn invalidate_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Json<InvalidatedOut> {
    state.cache.invalidate(&category).await;
    Json(InvalidatedOut {
        invalidated: category,
    })
}

async fn invalidate_all(State(state): State<AppState>) -> Json<InvalidatedOut> {
    state.cache.invalidate_all().await;
    Json(InvalidatedOut {
        invalidated: "*".to_string(),
    })
}
