// tests/cache.rs
//
// FeedCache over the real Aggregator with scripted fetchers and a pinned clock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use retro_feeds::cache::store::{DurableStore, FileStore, MemoryStore};
use retro_feeds::cache::{CacheEntry, CacheOutcome, CacheState, FeedCache, DEFAULT_TTL};
use retro_feeds::clock::ManualClock;
use retro_feeds::ingest::abort::AbortSignal;
use retro_feeds::ingest::types::{FeedBundle, FeedPipeline, FeedRequest, PipelineError};
use retro_feeds::ingest::{Aggregator, PipelineSettings};

mod common;
use common::{pinned_now, raw_item, test_catalog, Behavior, StubFetcher, SRC_A, SRC_B};

/// Counts pipeline runs on top of the real aggregator.
struct Spy {
    inner: Aggregator,
    runs: AtomicUsize,
}

#[async_trait]
impl FeedPipeline for Spy {
    async fn run(&self, req: &FeedRequest, abort: &AbortSignal) -> Result<FeedBundle, PipelineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run(req, abort).await
    }
}

struct Harness {
    cache: FeedCache,
    spy: Arc<Spy>,
    fetcher: Arc<StubFetcher>,
    clock: Arc<ManualClock>,
}

fn harness(durable: Arc<dyn DurableStore>) -> Harness {
    let clock = Arc::new(ManualClock::new(pinned_now()));
    let fetcher = Arc::new(
        StubFetcher::new()
            .with(SRC_A, Behavior::Items(vec![raw_item(SRC_A, "a1", 5), raw_item(SRC_A, "a2", 50)]))
            .with(SRC_B, Behavior::Items(vec![raw_item(SRC_B, "b1", 20)])),
    );
    let agg = Aggregator::new(
        Arc::new(test_catalog()),
        fetcher.clone(),
        PipelineSettings::default(),
    )
    .with_clock(clock.clone());
    let spy = Arc::new(Spy {
        inner: agg,
        runs: AtomicUsize::new(0),
    });
    let cache = FeedCache::new(spy.clone(), durable, DEFAULT_TTL).with_clock(clock.clone());
    Harness {
        cache,
        spy,
        fetcher,
        clock,
    }
}

impl Harness {
    fn runs(&self) -> usize {
        self.spy.runs.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn fresh_entry_is_served_without_rerunning_pipeline() {
    let h = harness(Arc::new(MemoryStore::new()));

    let first = h.cache.get_or_fetch("tech", Some("ai-machine-learning")).await;
    let second = h.cache.get_or_fetch("tech", Some("ai-machine-learning")).await;

    assert_eq!(h.runs(), 1);
    assert_eq!(first, second);
    assert_eq!(first.item_count, 3);
    assert_eq!(
        h.cache.state("tech", Some("ai-machine-learning")).await,
        CacheState::Fresh
    );
}

#[tokio::test]
async fn distinct_keys_are_cached_independently() {
    let h = harness(Arc::new(MemoryStore::new()));
    h.cache.get_or_fetch("tech", None).await;
    h.cache.get_or_fetch("tech", Some("ai-machine-learning")).await;
    h.cache.get_or_fetch("tech", Some(" ")).await; // same key as no subcategory
    assert_eq!(h.runs(), 2);
}

#[tokio::test]
async fn stale_entry_survives_a_failed_refresh() {
    let h = harness(Arc::new(MemoryStore::new()));
    let original = h.cache.get_or_fetch("tech", Some("ai-machine-learning")).await;

    h.clock.advance(chrono::Duration::minutes(16));
    h.fetcher.set(SRC_A, Behavior::Fail);
    h.fetcher.set(SRC_B, Behavior::Fail);

    let (served, outcome) = h
        .cache
        .get_or_fetch_traced("tech", Some("ai-machine-learning"), &AbortSignal::never())
        .await;
    assert_eq!(outcome, CacheOutcome::Stale);
    assert_eq!(served, original);
    assert_eq!(h.runs(), 2);
    // stale entry is kept, not overwritten by the failure
    assert_eq!(
        h.cache.state("tech", Some("ai-machine-learning")).await,
        CacheState::Stale
    );
}

#[tokio::test]
async fn expired_entry_is_replaced_on_success() {
    let h = harness(Arc::new(MemoryStore::new()));
    h.cache.get_or_fetch("news", Some("world")).await;

    h.clock.advance(chrono::Duration::minutes(15));
    h.fetcher
        .set(SRC_A, Behavior::Items(vec![raw_item(SRC_A, "later", 1)]));
    let (b, outcome) = h
        .cache
        .get_or_fetch_traced("news", Some("world"), &AbortSignal::never())
        .await;

    assert_eq!(outcome, CacheOutcome::Miss);
    assert_eq!(b.items[0].identity_key, "later");
    assert_eq!(h.cache.state("news", Some("world")).await, CacheState::Fresh);
}

#[tokio::test]
async fn failure_with_nothing_cached_yields_empty_bundle() {
    let h = harness(Arc::new(MemoryStore::new()));
    h.fetcher.set(SRC_A, Behavior::Fail);
    let (b, outcome) = h
        .cache
        .get_or_fetch_traced("news", Some("world"), &AbortSignal::never())
        .await;
    assert_eq!(outcome, CacheOutcome::Empty);
    assert!(b.is_empty());
    assert_eq!(b.category, "news");
    assert!(b.note.is_some());
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_pipeline_run() {
    let h = harness(Arc::new(MemoryStore::new()));
    h.fetcher.set(
        SRC_A,
        Behavior::Slow(Duration::from_secs(2), vec![raw_item(SRC_A, "slow", 3)]),
    );

    let never = AbortSignal::never();
    let (x, y, z) = tokio::join!(
        h.cache.get_or_fetch_traced("news", Some("world"), &never),
        h.cache.get_or_fetch_traced("news", Some("world"), &never),
        h.cache.get_or_fetch_traced("news", Some("world"), &never),
    );

    assert_eq!(h.runs(), 1);
    assert_eq!(x.0, y.0);
    assert_eq!(y.0, z.0);
    let outcomes = [x.1, y.1, z.1];
    assert_eq!(outcomes.iter().filter(|o| **o == CacheOutcome::Miss).count(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| **o == CacheOutcome::Coalesced).count(),
        2
    );
}

#[tokio::test]
async fn durable_tier_repopulates_a_new_process() {
    let dir = tempfile::tempdir().unwrap();

    let first = harness(Arc::new(FileStore::new(dir.path(), None).unwrap()));
    let original = first
        .cache
        .get_or_fetch("tech", Some("ai-machine-learning"))
        .await;
    assert_eq!(first.runs(), 1);

    // second cache shares only the directory
    let second = harness(Arc::new(FileStore::new(dir.path(), None).unwrap()));
    second.clock.advance(chrono::Duration::minutes(5));
    let (b, outcome) = second
        .cache
        .get_or_fetch_traced("tech", Some("ai-machine-learning"), &AbortSignal::never())
        .await;

    assert_eq!(outcome, CacheOutcome::Hit);
    assert_eq!(b, original);
    assert_eq!(second.runs(), 0);
}

#[tokio::test]
async fn file_store_layout_is_timestamp_and_data() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(Arc::new(FileStore::new(dir.path(), None).unwrap()));
    let bundle = h.cache.get_or_fetch("news", Some("world")).await;

    let raw = std::fs::read_to_string(dir.path().join("feed_news_world.json")).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["timestamp"].as_i64(), Some(pinned_now().timestamp_millis()));
    assert_eq!(v["data"]["category"], "news");
    assert_eq!(v["data"]["itemCount"], 2);

    let entry: CacheEntry = serde_json::from_value(v).unwrap();
    assert_eq!(entry.data, bundle);
}
