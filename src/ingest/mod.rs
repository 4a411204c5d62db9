// src/ingest/mod.rs
//! Fetch-normalize-aggregate pipeline.
//!
//! One call fans out over every source of a category (or subcategory), waits
//! for all of them with per-source timeouts, normalizes the raw items, then
//! merges, sorts newest first, dedups by identity key and truncates. A thin
//! result may be topped up from an optional fallback source.

pub mod abort;
pub mod dates;
pub mod providers;
pub mod types;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::FeedsConfig;
use crate::ingest::abort::AbortSignal;
use crate::ingest::types::{
    FallbackSource, FeedBundle, FeedFetcher, FeedItem, FeedPipeline, FeedRequest, FetchError,
    PipelineError, RawFeedItem,
};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Per-source fetch attempts.");
        describe_counter!(
            "feed_source_errors_total",
            "Per-source fetch/parse errors and timeouts."
        );
        describe_counter!(
            "feed_items_kept_total",
            "Items returned after merge, dedup and truncation."
        );
        describe_counter!("feed_dedup_total", "Items removed as duplicates.");
        describe_counter!("feed_fallback_total", "Fallback source queries.");
        describe_histogram!("feed_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_histogram!("feed_parse_ms", "Feed document parse time in milliseconds.");
    });
}

/// Decode entities, strip tags, fold quotes and whitespace.
pub fn strip_html(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Drop script/style bodies, then the remaining tags
    static RE_BLOCKS: OnceCell<Regex> = OnceCell::new();
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>").expect("block regex")
    });
    out = re_blocks.replace_all(&out, " ").to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z!][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[\s\u{00A0}]+").expect("ws regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

pub const ELLIPSIS: &str = "...";

/// Cap at `max` chars; a cut string gets `...` appended.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.truncate(out.trim_end().len());
    out.push_str(ELLIPSIS);
    out
}

/// guid, else link, else a random key that never collides.
pub fn identity_key(guid: Option<&str>, link: Option<&str>) -> String {
    let pick = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    pick(guid)
        .or_else(|| pick(link))
        .unwrap_or_else(|| format!("random:{:016x}", rand::random::<u64>()))
}

/// Map a raw item to the canonical shape. `None` when title or link is unusable.
pub fn normalize_item(
    raw: RawFeedItem,
    catalog: &Catalog,
    now: DateTime<Utc>,
    description_max_chars: usize,
) -> Option<FeedItem> {
    let title = raw.title.as_deref().map(strip_html).filter(|t| !t.is_empty())?;
    let link = raw
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())?
        .to_string();

    let body = raw
        .description
        .as_deref()
        .or(raw.content.as_deref())
        .map(strip_html)
        .unwrap_or_default();
    let description = truncate_chars(&body, description_max_chars);

    let source_name = catalog.display_name_for(&raw.source);
    let creator = raw
        .creators
        .iter()
        .map(|c| strip_html(c))
        .find(|c| !c.is_empty())
        .unwrap_or_else(|| source_name.clone());
    let thumbnail_url = raw
        .thumbnails
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string);

    // Undated or unparseable items sort as "now".
    let published_at = dates::first_parseable(&raw.date_candidates).unwrap_or(now);

    Some(FeedItem {
        identity_key: identity_key(raw.guid.as_deref(), Some(link.as_str())),
        title,
        link,
        description,
        thumbnail_url,
        source_name,
        source_locator: raw.source,
        creator,
        relative_time: dates::relative_time(published_at, now),
        published_at,
    })
}

/// Sort newest first (stable), drop repeated identity keys, keep `max`.
/// Returns the survivors and the number of duplicates removed.
pub fn merge_items(mut items: Vec<FeedItem>, max: usize) -> (Vec<FeedItem>, usize) {
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut keep = Vec::with_capacity(items.len().min(max));
    let mut dedup = 0usize;
    for it in items {
        if !seen.insert(it.identity_key.clone()) {
            dedup += 1;
            continue;
        }
        keep.push(it);
    }
    keep.truncate(max);
    (keep, dedup)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_items: usize,
    pub min_items: usize,
    pub fetch_timeout: Duration,
    pub description_max_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        (&FeedsConfig::default()).into()
    }
}

impl From<&FeedsConfig> for PipelineSettings {
    fn from(c: &FeedsConfig) -> Self {
        Self {
            max_items: c.max_items,
            min_items: c.min_items,
            fetch_timeout: c.fetch_timeout(),
            description_max_chars: c.description_max_chars,
        }
    }
}

/// The production pipeline.
pub struct Aggregator {
    catalog: Arc<Catalog>,
    fetcher: Arc<dyn FeedFetcher>,
    fallback: Option<Arc<dyn FallbackSource>>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl Aggregator {
    pub fn new(
        catalog: Arc<Catalog>,
        fetcher: Arc<dyn FeedFetcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            fallback: None,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Subcategory sources when given, else the whole category. Repeated
    /// locators are fetched once.
    fn resolve_sources(&self, req: &FeedRequest) -> Vec<String> {
        let all = match &req.subcategory {
            Some(sub) => self.catalog.sources_for_subcategory(&req.category, sub),
            None => self.catalog.sources_for_category(&req.category),
        };
        let mut seen = HashSet::new();
        all.into_iter().filter(|l| seen.insert(l.clone())).collect()
    }

    async fn fetch_one(
        &self,
        locator: &str,
        abort: &AbortSignal,
    ) -> Result<Vec<RawFeedItem>, FetchError> {
        counter!("feed_fetch_total").increment(1);
        let t0 = Instant::now();
        let timeout = self.settings.fetch_timeout;
        let res = tokio::select! {
            biased;
            _ = abort.aborted() => Err(FetchError::Cancelled),
            r = tokio::time::timeout(timeout, self.fetcher.fetch(locator)) => match r {
                Ok(inner) => inner,
                Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
            },
        };
        histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        res
    }

    async fn query_fallback(
        &self,
        fallback: &dyn FallbackSource,
        req: &FeedRequest,
        now: DateTime<Utc>,
        abort: &AbortSignal,
    ) -> Result<Vec<FeedItem>, FetchError> {
        counter!("feed_fallback_total").increment(1);
        let timeout = self.settings.fetch_timeout;
        let query = req.fallback_query();
        let res = tokio::select! {
            biased;
            _ = abort.aborted() => Err(FetchError::Cancelled),
            r = tokio::time::timeout(timeout, fallback.search(&query, self.settings.max_items)) => match r {
                Ok(inner) => inner,
                Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
            },
        };
        Ok(res?
            .into_iter()
            .filter_map(|r| {
                normalize_item(r, &self.catalog, now, self.settings.description_max_chars)
            })
            .collect())
    }

    /// Produce a bundle for `req`.
    ///
    /// Individual source failures only reduce the item count. The call fails
    /// when the request is invalid, when it is aborted, or when every source
    /// failed and the fallback contributed nothing.
    pub async fn aggregate(
        &self,
        req: &FeedRequest,
        abort: &AbortSignal,
    ) -> Result<FeedBundle, PipelineError> {
        ensure_metrics_described();

        if req.category.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "category must not be empty".into(),
            ));
        }
        if abort.is_aborted() {
            return Err(PipelineError::Cancelled);
        }

        let now = self.clock.now();
        let sources = self.resolve_sources(req);
        if sources.is_empty() {
            tracing::info!(target: "ingest", key = %req.cache_key(), "no sources configured");
            return Ok(FeedBundle::empty(
                req,
                now,
                format!("no sources configured for {}", req.cache_key()),
            ));
        }

        // Fan out; join_all keeps source order regardless of completion order.
        let results = join_all(sources.iter().map(|loc| self.fetch_one(loc, abort))).await;
        if abort.is_aborted() {
            return Err(PipelineError::Cancelled);
        }

        let mut failed = 0usize;
        let mut items = Vec::new();
        for (loc, res) in sources.iter().zip(results) {
            match res {
                Ok(raws) => items.extend(raws.into_iter().filter_map(|r| {
                    normalize_item(r, &self.catalog, now, self.settings.description_max_chars)
                })),
                Err(e) => {
                    failed += 1;
                    counter!("feed_source_errors_total").increment(1);
                    tracing::warn!(target: "ingest", error = %e, source = %loc, "source fetch failed");
                }
            }
        }

        let (mut merged, mut dedup) = merge_items(items, self.settings.max_items);

        let mut used_fallback = false;
        if merged.len() < self.settings.min_items {
            if let Some(fb) = &self.fallback {
                match self.query_fallback(fb.as_ref(), req, now, abort).await {
                    Ok(extra) if !extra.is_empty() => {
                        used_fallback = true;
                        merged.extend(extra);
                        let (m, d) = merge_items(merged, self.settings.max_items);
                        merged = m;
                        dedup += d;
                    }
                    Ok(_) => {}
                    Err(FetchError::Cancelled) => return Err(PipelineError::Cancelled),
                    Err(e) => {
                        tracing::warn!(target: "ingest", error = %e, fallback = fb.name(), "fallback query failed");
                    }
                }
            }
        }

        if failed == sources.len() && !used_fallback {
            return Err(PipelineError::AllSourcesFailed(failed));
        }

        counter!("feed_items_kept_total").increment(merged.len() as u64);
        counter!("feed_dedup_total").increment(dedup as u64);
        tracing::info!(
            target: "ingest",
            key = %req.cache_key(),
            sources = sources.len(),
            failed,
            kept = merged.len(),
            dedup,
            used_fallback,
            "aggregated feed"
        );

        let mut bundle = FeedBundle::new(req, merged, now);
        bundle.failed_sources = failed;
        bundle.used_fallback = used_fallback;
        Ok(bundle)
    }
}

#[async_trait::async_trait]
impl FeedPipeline for Aggregator {
    async fn run(
        &self,
        req: &FeedRequest,
        abort: &AbortSignal,
    ) -> Result<FeedBundle, PipelineError> {
        self.aggregate(req, abort).await
    }
}
