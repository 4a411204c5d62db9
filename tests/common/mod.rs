// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use retro_feeds::catalog::{Catalog, Category, Subcategory};
use retro_feeds::ingest::types::{FeedFetcher, FetchError, RawFeedItem};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const SRC_A: &str = "https://a.example.com/feed";
pub const SRC_B: &str = "https://www.b.example.org/rss";
pub const SRC_C: &str = "https://c.example.net/atom";

pub fn pinned_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
}

/// Catalog: tech/{ai-machine-learning: A, B}, tech/gadgets: C, news/world: A.
pub fn test_catalog() -> Catalog {
    let sub = |name: &str, srcs: &[&str]| Subcategory {
        name: name.to_string(),
        sources: srcs.iter().map(|s| s.to_string()).collect(),
    };
    let mut names = HashMap::new();
    names.insert(SRC_A.to_string(), "Alpha Wire".to_string());
    Catalog::new(
        vec![
            Category {
                name: "tech".into(),
                subcategories: vec![
                    sub("ai-machine-learning", &[SRC_A, SRC_B]),
                    sub("gadgets", &[SRC_C]),
                ],
            },
            Category {
                name: "news".into(),
                subcategories: vec![sub("world", &[SRC_A])],
            },
        ],
        names,
    )
}

/// Raw item dated `mins_ago` minutes before `pinned_now()`.
pub fn raw_item(source: &str, id: &str, mins_ago: i64) -> RawFeedItem {
    let ts = pinned_now() - chrono::Duration::minutes(mins_ago);
    RawFeedItem {
        title: Some(format!("Story {id}")),
        link: Some(format!("https://news.test/{id}")),
        guid: Some(id.to_string()),
        description: Some(format!("<p>About {id}</p>")),
        date_candidates: vec![ts.to_rfc2822()],
        source: source.to_string(),
        ..Default::default()
    }
}

#[derive(Clone)]
pub enum Behavior {
    Items(Vec<RawFeedItem>),
    Fail,
    /// Sleeps well past any sane timeout.
    Hang,
    /// Sleeps, then returns items.
    Slow(Duration, Vec<RawFeedItem>),
}

/// Scriptable fetcher with a per-call spy.
#[derive(Default)]
pub struct StubFetcher {
    behaviors: Mutex<HashMap<String, Behavior>>,
    pub calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, locator: &str, b: Behavior) -> Self {
        self.set(locator, b);
        self
    }

    pub fn set(&self, locator: &str, b: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(locator.to_string(), b);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<RawFeedItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let b = self.behaviors.lock().unwrap().get(locator).cloned();
        match b {
            Some(Behavior::Items(v)) => Ok(v),
            Some(Behavior::Fail) | None => Err(FetchError::Status(503)),
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            Some(Behavior::Slow(d, v)) => {
                tokio::time::sleep(d).await;
                Ok(v)
            }
        }
    }
}
