// src/config/feeds.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

pub const ENV_CONFIG_PATH: &str = "FEEDS_CONFIG_PATH";

fn default_max_items() -> usize {
    20
}
fn default_min_items() -> usize {
    5
}
fn default_fetch_timeout_ms() -> u64 {
    6_000
}
fn default_description_max_chars() -> usize {
    200
}
fn default_cache_ttl_ms() -> u64 {
    15 * 60 * 1000
}
fn default_user_agent() -> String {
    "retro-feeds/0.1 (+feed reader)".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl FallbackConfig {
    /// URL to query, only when enabled and non-blank.
    pub fn active_url(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedsConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Below this many merged items the fallback source is consulted.
    #[serde(default = "default_min_items")]
    pub min_items: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_description_max_chars")]
    pub description_max_chars: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Directory for the durable tier; in-memory when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub durable_capacity_bytes: Option<u64>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            min_items: default_min_items(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            description_max_chars: default_description_max_chars(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_dir: None,
            durable_capacity_bytes: None,
            fallback: FallbackConfig::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl FeedsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading feeds config from {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut cfg: FeedsConfig = if is_json {
            serde_json::from_str(&data).context("parsing feeds config json")?
        } else {
            toml::from_str(&data).context("parsing feeds config toml")?
        };
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $FEEDS_CONFIG_PATH
    /// 2) config/feeds.toml
    /// 3) config/feeds.json
    /// 4) defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("FEEDS_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else if Path::new("config/feeds.toml").exists() {
            Self::load_from_file("config/feeds.toml")?
        } else if Path::new("config/feeds.json").exists() {
            Self::load_from_file("config/feeds.json")?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>("FEEDS_CACHE_TTL_MS") {
            self.cache_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u64>("FEEDS_FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("FEEDS_MAX_ITEMS") {
            self.max_items = v;
        }
        if let Ok(v) = env::var("FEEDS_CACHE_DIR") {
            if !v.trim().is_empty() {
                self.cache_dir = Some(PathBuf::from(v.trim()));
            }
        }
        if let Ok(v) = env::var("FEEDS_FALLBACK_URL") {
            if !v.trim().is_empty() {
                self.fallback.enabled = true;
                self.fallback.base_url = Some(v.trim().to_string());
            }
        }
    }

    /// Clamp nonsense values back to defaults.
    fn sanitize(&mut self) {
        if self.max_items == 0 {
            self.max_items = default_max_items();
        }
        if self.fetch_timeout_ms == 0 {
            self.fetch_timeout_ms = default_fetch_timeout_ms();
        }
        if self.description_max_chars == 0 {
            self.description_max_chars = default_description_max_chars();
        }
        if self.min_items > self.max_items {
            self.min_items = self.max_items;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}
