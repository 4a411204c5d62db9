// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::abort::AbortSignal;

/// Opaque feed location, normally an http(s) URL.
pub type Locator = String;

/// Item as produced by a fetcher, before normalization.
///
/// Upstream formats disagree on field names (dc:creator vs author, media:thumbnail
/// vs enclosure, pubDate vs published), so every candidate is kept and the
/// normalizer picks the first usable one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub creators: Vec<String>,
    pub thumbnails: Vec<String>,
    pub date_candidates: Vec<String>,
    /// Locator of the feed this item came from.
    pub source: Locator,
}

/// Canonical item served to callers and stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub source_name: String,
    pub source_locator: Locator,
    pub creator: String,
    pub identity_key: String,
    pub published_at: DateTime<Utc>,
    pub relative_time: String,
}

/// Result of one aggregation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedBundle {
    pub category: String,
    pub subcategory: Option<String>,
    pub items: Vec<FeedItem>,
    pub item_count: usize,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub failed_sources: usize,
    #[serde(default)]
    pub used_fallback: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl FeedBundle {
    pub fn new(req: &FeedRequest, items: Vec<FeedItem>, generated_at: DateTime<Utc>) -> Self {
        Self {
            category: req.category.clone(),
            subcategory: req.subcategory.clone(),
            item_count: items.len(),
            items,
            generated_at,
            failed_sources: 0,
            used_fallback: false,
            note: None,
        }
    }

    pub fn empty(req: &FeedRequest, generated_at: DateTime<Utc>, note: impl Into<String>) -> Self {
        let mut b = Self::new(req, Vec::new(), generated_at);
        b.note = Some(note.into());
        b
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// (category, optional subcategory) pair identifying one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedRequest {
    pub category: String,
    pub subcategory: Option<String>,
}

impl FeedRequest {
    pub fn new(category: impl Into<String>, subcategory: Option<&str>) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    /// Storage key: `feed_<category>` or `feed_<category>_<subcategory>`.
    pub fn cache_key(&self) -> String {
        match &self.subcategory {
            Some(sub) => format!("feed_{}_{}", self.category, sub),
            None => format!("feed_{}", self.category),
        }
    }

    /// Free-text query handed to the fallback source.
    pub fn fallback_query(&self) -> String {
        self.subcategory
            .as_deref()
            .unwrap_or(&self.category)
            .replace(['-', '_'], " ")
    }
}

/// Failure of a single upstream source. Absorbed by the pipeline.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("failed to parse feed: {0}")]
    Parse(String),
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),
    #[error("fetch cancelled")]
    Cancelled,
}

/// Failure of a whole aggregation call. Crosses into the cache layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid feed request: {0}")]
    InvalidRequest(String),
    #[error("all {0} sources failed")]
    AllSourcesFailed(usize),
    #[error("aggregation cancelled")]
    Cancelled,
}

/// Retrieves and parses one feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Vec<RawFeedItem>, FetchError>;
}

/// Secondary content source queried when the feeds under-produce.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawFeedItem>, FetchError>;
    fn name(&self) -> &'static str;
}

/// A function from request to bundle; the cache layer only sees this seam.
#[async_trait]
pub trait FeedPipeline: Send + Sync {
    async fn run(&self, req: &FeedRequest, abort: &AbortSignal)
        -> Result<FeedBundle, PipelineError>;
}
