// src/bootstrap.rs
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::AppState;
use crate::cache::store::{DurableStore, FileStore, MemoryStore};
use crate::cache::FeedCache;
use crate::catalog::Catalog;
use crate::config::FeedsConfig;
use crate::ingest::providers::{HttpFeedFetcher, JsonSearchFallback};
use crate::ingest::{Aggregator, PipelineSettings};
use crate::metrics::Metrics;

/// Everything the HTTP layer needs, wired from config.
pub struct FeedRuntime {
    pub cfg: FeedsConfig,
    pub catalog: Arc<Catalog>,
    pub cache: Arc<FeedCache>,
}

impl FeedRuntime {
    pub fn from_config(cfg: FeedsConfig, catalog: Catalog) -> anyhow::Result<Self> {
        let catalog = Arc::new(catalog);

        let fetcher = HttpFeedFetcher::new(&cfg.user_agent, cfg.fetch_timeout())
            .context("building feed http client")?;
        let mut aggregator =
            Aggregator::new(catalog.clone(), Arc::new(fetcher), PipelineSettings::from(&cfg));
        if let Some(url) = cfg.fallback.active_url() {
            let fb = JsonSearchFallback::new(url, &cfg.user_agent, cfg.fetch_timeout())
                .context("building fallback http client")?;
            aggregator = aggregator.with_fallback(Arc::new(fb));
        }

        let durable: Arc<dyn DurableStore> = match &cfg.cache_dir {
            Some(dir) => match FileStore::new(dir, cfg.durable_capacity_bytes) {
                Ok(fs) => Arc::new(fs),
                Err(e) => {
                    warn!(error = %e, dir = %dir.display(), "cache dir unusable; durable tier in memory");
                    Arc::new(MemoryStore::new())
                }
            },
            None => Arc::new(MemoryStore::new()),
        };

        let cache = Arc::new(FeedCache::new(
            Arc::new(aggregator),
            durable,
            cfg.cache_ttl(),
        ));

        // Safe diagnostics only
        info!(
            categories = catalog.categories().len(),
            ttl_ms = cfg.cache_ttl_ms,
            timeout_ms = cfg.fetch_timeout_ms,
            fallback = cfg.fallback.active_url().is_some(),
            durable_dir = ?cfg.cache_dir,
            "feed runtime ready"
        );

        Ok(Self {
            cfg,
            catalog,
            cache,
        })
    }

    /// Install the Prometheus recorder, then wire the runtime. The recorder
    /// must exist before the cache and pipeline describe their metrics.
    pub fn start(cfg: FeedsConfig, catalog: Catalog) -> anyhow::Result<(Self, Metrics)> {
        let metrics = Metrics::init(cfg.cache_ttl_ms)?;
        let runtime = Self::from_config(cfg, catalog)?;
        Ok((runtime, metrics))
    }

    /// `start` with config and catalog from their default locations.
    pub fn from_env() -> anyhow::Result<(Self, Metrics)> {
        let cfg = FeedsConfig::load_default()?;
        let catalog = Catalog::load_default()?;
        Self::start(cfg, catalog)
    }

    pub fn state(&self) -> AppState {
        AppState {
            cache: self.cache.clone(),
            catalog: self.catalog.clone(),
        }
    }
}
