// src/cache/mod.rs
//! # Feed Cache
//! Two-tier TTL cache in front of the aggregation pipeline.
//!
//! Per key the state is Empty, Fresh (age < TTL) or Stale (age >= TTL):
//! - Fresh: served directly, the pipeline is not invoked.
//! - Empty/Stale: the pipeline runs; success replaces the entry, failure serves
//!   the stale bundle when there is one and an empty bundle otherwise.
//!
//! The fast tier is an in-process map; the durable tier (`DurableStore`) survives
//! restarts and repopulates the fast tier on read. Concurrent misses for one key
//! share a single pipeline run (single-flight). `get_or_fetch` never fails.

pub mod store;

use metrics::{counter, describe_counter, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::{Clock, SystemClock};
use crate::ingest::abort::AbortSignal;
use crate::ingest::types::{FeedBundle, FeedPipeline, FeedRequest};
use store::{DurableStore, StoreError};

pub const KEY_PREFIX: &str = "feed_";
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
/// Share of durable entries dropped when the store reports it is full.
pub const EVICT_FRACTION: f64 = 0.25;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_cache_hits_total", "Requests served from a fresh entry.");
        describe_counter!("feed_cache_misses_total", "Requests that ran the pipeline.");
        describe_counter!(
            "feed_cache_stale_served_total",
            "Pipeline failures answered with a stale entry."
        );
        describe_counter!(
            "feed_cache_empty_served_total",
            "Pipeline failures with no entry to fall back on."
        );
        describe_counter!(
            "feed_durable_evictions_total",
            "Durable entries evicted to reclaim space."
        );
        describe_counter!(
            "feed_durable_write_dropped_total",
            "Durable writes dropped after eviction and retry."
        );
    });
}

/// Persisted layout: `{ "timestamp": <epoch ms>, "data": <FeedBundle> }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub timestamp: i64,
    pub data: FeedBundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Fresh entry found.
    Hit,
    /// Fresh entry produced by a concurrent request for the same key.
    Coalesced,
    /// Pipeline ran and succeeded.
    Miss,
    /// Pipeline failed; stale entry served.
    Stale,
    /// Pipeline failed; nothing cached.
    Empty,
}

impl CacheOutcome {
    pub fn as_header(&self) -> &'static str {
        match self {
            CacheOutcome::Hit | CacheOutcome::Coalesced => "HIT",
            CacheOutcome::Miss => "MISS",
            CacheOutcome::Stale => "STALE",
            CacheOutcome::Empty => "EMPTY",
        }
    }
}

pub struct FeedCache {
    pipeline: Arc<dyn FeedPipeline>,
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    fast: RwLock<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Serializes durable writes with the eviction pass.
    durable_writer: AsyncMutex<()>,
}

impl FeedCache {
    pub fn new(
        pipeline: Arc<dyn FeedPipeline>,
        durable: Arc<dyn DurableStore>,
        ttl: Duration,
    ) -> Self {
        ensure_metrics_described();
        gauge!("feed_cache_ttl_ms").set(ttl.as_millis() as f64);
        Self {
            pipeline,
            durable,
            clock: Arc::new(SystemClock),
            ttl,
            fast: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            durable_writer: AsyncMutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let age_ms = self.clock.now_ms().saturating_sub(entry.timestamp);
        age_ms < self.ttl.as_millis() as i64
    }

    /// Fast tier first, then the durable tier (which repopulates the fast tier).
    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        {
            let fast = self.fast.read().unwrap_or_else(|p| p.into_inner());
            if let Some(e) = fast.get(key) {
                return Some(e.clone());
            }
        }

        let value = match self.durable.get(key).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, key, "durable read failed");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_value(value) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, key, "durable entry unreadable");
                return None;
            }
        };
        self.fast
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), entry.clone());
        Some(entry)
    }

    /// Current state of the entry for `(category, subcategory)`.
    pub async fn state(&self, category: &str, subcategory: Option<&str>) -> CacheState {
        let key = FeedRequest::new(category.trim(), subcategory).cache_key();
        match self.lookup(&key).await {
            None => CacheState::Empty,
            Some(e) if self.is_fresh(&e) => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    pub async fn get_or_fetch(&self, category: &str, subcategory: Option<&str>) -> FeedBundle {
        self.get_or_fetch_with_abort(category, subcategory, &AbortSignal::never())
            .await
    }

    pub async fn get_or_fetch_with_abort(
        &self,
        category: &str,
        subcategory: Option<&str>,
        abort: &AbortSignal,
    ) -> FeedBundle {
        self.get_or_fetch_traced(category, subcategory, abort)
            .await
            .0
    }

    /// Same as `get_or_fetch_with_abort`, also reporting how it was answered.
    pub async fn get_or_fetch_traced(
        &self,
        category: &str,
        subcategory: Option<&str>,
        abort: &AbortSignal,
    ) -> (FeedBundle, CacheOutcome) {
        let req = FeedRequest::new(category.trim(), subcategory);
        let key = req.cache_key();

        if let Some(e) = self.lookup(&key).await {
            if self.is_fresh(&e) {
                counter!("feed_cache_hits_total").increment(1);
                return (e.data, CacheOutcome::Hit);
            }
        }

        let flight = self.flight_lock(&key);
        let guard = flight.lock().await;
        let out = self.refresh(&req, &key, abort).await;
        drop(guard);
        self.release_flight(&key, &flight);
        out
    }

    /// Runs under the per-key flight lock.
    async fn refresh(
        &self,
        req: &FeedRequest,
        key: &str,
        abort: &AbortSignal,
    ) -> (FeedBundle, CacheOutcome) {
        // A leader may have refreshed the entry while we waited.
        let existing = self.lookup(key).await;
        if let Some(e) = &existing {
            if self.is_fresh(e) {
                counter!("feed_cache_hits_total").increment(1);
                return (e.data.clone(), CacheOutcome::Coalesced);
            }
        }

        counter!("feed_cache_misses_total").increment(1);
        match self.pipeline.run(req, abort).await {
            Ok(bundle) => {
                self.store(key, bundle.clone()).await;
                (bundle, CacheOutcome::Miss)
            }
            Err(err) => match existing {
                Some(stale) => {
                    counter!("feed_cache_stale_served_total").increment(1);
                    tracing::warn!(
                        target: "cache",
                        error = %err,
                        key,
                        stored_at = stale.timestamp,
                        "pipeline failed; serving stale entry"
                    );
                    (stale.data, CacheOutcome::Stale)
                }
                None => {
                    counter!("feed_cache_empty_served_total").increment(1);
                    tracing::warn!(target: "cache", error = %err, key, "pipeline failed; nothing cached");
                    (
                        FeedBundle::empty(req, self.clock.now(), format!("feed unavailable: {err}")),
                        CacheOutcome::Empty,
                    )
                }
            },
        }
    }

    fn flight_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_flight(&self, key: &str, flight: &Arc<AsyncMutex<()>>) {
        let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        // map + our handle; anything above that is a waiter still queued
        let idle = map
            .get(key)
            .is_some_and(|cur| Arc::ptr_eq(cur, flight) && Arc::strong_count(flight) <= 2);
        if idle {
            map.remove(key);
        }
    }

    async fn store(&self, key: &str, bundle: FeedBundle) {
        let entry = CacheEntry {
            timestamp: self.clock.now_ms(),
            data: bundle,
        };
        self.fast
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), entry.clone());
        self.persist(key, &entry).await;
    }

    /// Durable write with one evict-and-retry on capacity errors. Failures are
    /// absorbed; the fast tier stays authoritative for this process.
    async fn persist(&self, key: &str, entry: &CacheEntry) {
        let value = match serde_json::to_value(entry) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, key, "cache entry not serializable");
                return;
            }
        };

        let _w = self.durable_writer.lock().await;
        match self.durable.set(key, &value).await {
            Ok(()) => {}
            Err(StoreError::CapacityExceeded) => {
                let evicted = self.evict_oldest_locked().await;
                tracing::info!(target: "cache", key, evicted, "durable store full; evicted oldest entries");
                if let Err(e) = self.durable.set(key, &value).await {
                    counter!("feed_durable_write_dropped_total").increment(1);
                    tracing::debug!(target: "cache", error = %e, key, "durable write dropped after retry");
                }
            }
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, key, "durable write failed");
            }
        }
    }

    /// Remove the oldest `EVICT_FRACTION` (at least one) of the durable feed
    /// entries. Caller must hold `durable_writer`.
    async fn evict_oldest_locked(&self) -> usize {
        let keys = match self.durable.keys().await {
            Ok(k) => k,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "durable key listing failed");
                return 0;
            }
        };

        let mut aged = Vec::new();
        for k in keys.into_iter().filter(|k| k.starts_with(KEY_PREFIX)) {
            // unreadable entries count as oldest
            let ts = match self.durable.get(&k).await {
                Ok(Some(v)) => v.get("timestamp").and_then(|t| t.as_i64()).unwrap_or(0),
                _ => 0,
            };
            aged.push((ts, k));
        }
        if aged.is_empty() {
            return 0;
        }
        aged.sort();

        let n = ((aged.len() as f64 * EVICT_FRACTION).ceil() as usize).clamp(1, aged.len());
        let mut removed = 0usize;
        for (_, k) in aged.into_iter().take(n) {
            match self.durable.remove(&k).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(target: "cache", error = %e, key = %k, "durable eviction failed"),
            }
        }
        counter!("feed_durable_evictions_total").increment(removed as u64);
        removed
    }

    /// Drop `feed_<category>` and every `feed_<category>_*` entry from both tiers.
    pub async fn invalidate(&self, category: &str) {
        let exact = format!("{KEY_PREFIX}{}", category.trim());
        let nested = format!("{exact}_");
        let matches = |k: &str| k == exact || k.starts_with(&nested);

        let fast_removed = {
            let mut fast = self.fast.write().unwrap_or_else(|p| p.into_inner());
            let before = fast.len();
            fast.retain(|k, _| !matches(k));
            before - fast.len()
        };
        let durable_removed = self.remove_durable_where(matches).await;
        tracing::info!(target: "cache", category, fast_removed, durable_removed, "invalidated category");
    }

    /// Clear every feed entry in both tiers.
    pub async fn invalidate_all(&self) {
        self.fast.write().unwrap_or_else(|p| p.into_inner()).clear();
        let durable_removed = self
            .remove_durable_where(|k: &str| k.starts_with(KEY_PREFIX))
            .await;
        tracing::info!(target: "cache", durable_removed, "invalidated all feeds");
    }

    async fn remove_durable_where<F: Fn(&str) -> bool>(&self, pred: F) -> usize {
        let _w = self.durable_writer.lock().await;
        let keys = match self.durable.keys().await {
            Ok(k) => k,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "durable key listing failed");
                return 0;
            }
        };
        let mut removed = 0usize;
        for k in keys.into_iter().filter(|k| pred(k)) {
            match self.durable.remove(&k).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(target: "cache", error = %e, key = %k, "durable remove failed"),
            }
        }
        removed
    }
}
