//! # Source Catalog
//!
//! Static mapping from `(category, subcategory)` to feed locators, plus a
//! display-name table for the reader's "source" column.
//!
//! - Built-in seed mirrors the news reader's menu (tech, news, science, entertainment).
//! - Optional override from TOML or JSON (`$FEED_CATALOG_PATH` or `config/feed_catalog.*`).
//! - Lookups never fail: unknown keys yield empty lists.
//!
//! The catalog is immutable after construction and shared behind an `Arc`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::Locator;

pub const ENV_CATALOG_PATH: &str = "FEED_CATALOG_PATH";
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subcategory {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<Locator>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<Subcategory>,
}

/// File schema for catalog overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub display_names: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    categories: Vec<Category>,
    display_names: HashMap<String, String>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>, display_names: HashMap<String, String>) -> Self {
        let categories = categories
            .into_iter()
            .filter_map(|c| {
                let name = c.name.trim().to_string();
                if name.is_empty() {
                    return None;
                }
                let subcategories = c
                    .subcategories
                    .into_iter()
                    .filter(|s| !s.name.trim().is_empty())
                    .map(|s| Subcategory {
                        name: s.name.trim().to_string(),
                        sources: clean_list(s.sources),
                    })
                    .collect();
                Some(Category {
                    name,
                    subcategories,
                })
            })
            .collect();
        Self {
            categories,
            display_names,
        }
    }

    fn find(&self, category: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == category)
    }

    /// Every subcategory's locators under `category`, in declaration order.
    pub fn sources_for_category(&self, category: &str) -> Vec<Locator> {
        self.find(category)
            .map(|c| {
                c.subcategories
                    .iter()
                    .flat_map(|s| s.sources.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sources_for_subcategory(&self, category: &str, subcategory: &str) -> Vec<Locator> {
        self.find(category)
            .and_then(|c| c.subcategories.iter().find(|s| s.name == subcategory))
            .map(|s| s.sources.clone())
            .unwrap_or_default()
    }

    /// Table lookup, then URL host without `www.`, then `"Unknown Source"`.
    pub fn display_name_for(&self, locator: &str) -> String {
        if let Some(name) = self.display_names.get(locator) {
            return name.clone();
        }
        host_display_name(locator).unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn subcategories(&self, category: &str) -> Vec<String> {
        self.find(category)
            .map(|c| c.subcategories.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feed catalog from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let file = parse_catalog(&content, &ext)?;
        Ok(Self::new(file.categories, file.display_names))
    }

    /// Load using env var + fallbacks:
    /// 1) $FEED_CATALOG_PATH
    /// 2) config/feed_catalog.toml
    /// 3) config/feed_catalog.json
    /// 4) built-in seed
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CATALOG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("FEED_CATALOG_PATH points to non-existent path"));
        }
        for candidate in ["config/feed_catalog.toml", "config/feed_catalog.json"] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        Ok(Self::builtin())
    }

    /// Built-in seed used when no catalog file is found.
    pub fn builtin() -> Self {
        let seed: &[(&str, &[(&str, &[&str])])] = &[
            (
                "tech",
                &[
                    (
                        "ai-machine-learning",
                        &[
                            "https://www.technologyreview.com/topic/artificial-intelligence/feed",
                            "https://blogs.nvidia.com/feed/",
                            "https://www.marktechpost.com/feed/",
                        ],
                    ),
                    (
                        "programming",
                        &[
                            "https://hnrss.org/frontpage",
                            "https://blog.rust-lang.org/feed.xml",
                            "https://github.blog/feed/",
                        ],
                    ),
                    (
                        "gadgets",
                        &[
                            "https://www.theverge.com/rss/index.xml",
                            "https://www.engadget.com/rss.xml",
                            "https://feeds.arstechnica.com/arstechnica/gadgets",
                        ],
                    ),
                ],
            ),
            (
                "news",
                &[
                    (
                        "world",
                        &[
                            "https://feeds.bbci.co.uk/news/world/rss.xml",
                            "https://www.aljazeera.com/xml/rss/all.xml",
                        ],
                    ),
                    (
                        "business",
                        &[
                            "https://feeds.bbci.co.uk/news/business/rss.xml",
                            "https://www.cnbc.com/id/10001147/device/rss/rss.html",
                        ],
                    ),
                ],
            ),
            (
                "science",
                &[
                    (
                        "space",
                        &[
                            "https://www.nasa.gov/news-release/feed/",
                            "https://www.space.com/feeds/all",
                        ],
                    ),
                    (
                        "general",
                        &[
                            "https://www.sciencedaily.com/rss/all.xml",
                            "https://www.newscientist.com/feed/home/",
                        ],
                    ),
                ],
            ),
            (
                "entertainment",
                &[
                    (
                        "gaming",
                        &[
                            "https://www.polygon.com/rss/index.xml",
                            "https://kotaku.com/rss",
                        ],
                    ),
                    ("movies", &["https://variety.com/feed/"]),
                ],
            ),
        ];

        let categories = seed
            .iter()
            .map(|(cat, subs)| Category {
                name: cat.to_string(),
                subcategories: subs
                    .iter()
                    .map(|(sub, srcs)| Subcategory {
                        name: sub.to_string(),
                        sources: srcs.iter().map(|s| s.to_string()).collect(),
                    })
                    .collect(),
            })
            .collect();

        let mut display_names = HashMap::new();
        for (loc, name) in [
            (
                "https://www.technologyreview.com/topic/artificial-intelligence/feed",
                "MIT Technology Review",
            ),
            ("https://blogs.nvidia.com/feed/", "NVIDIA Blog"),
            ("https://www.marktechpost.com/feed/", "MarkTechPost"),
            ("https://hnrss.org/frontpage", "Hacker News"),
            ("https://blog.rust-lang.org/feed.xml", "Rust Blog"),
            ("https://github.blog/feed/", "The GitHub Blog"),
            ("https://www.theverge.com/rss/index.xml", "The Verge"),
            ("https://www.engadget.com/rss.xml", "Engadget"),
            ("https://feeds.arstechnica.com/arstechnica/gadgets", "Ars Technica"),
            ("https://feeds.bbci.co.uk/news/world/rss.xml", "BBC News"),
            ("https://feeds.bbci.co.uk/news/business/rss.xml", "BBC Business"),
            ("https://www.aljazeera.com/xml/rss/all.xml", "Al Jazeera"),
            ("https://www.cnbc.com/id/10001147/device/rss/rss.html", "CNBC"),
            ("https://www.nasa.gov/news-release/feed/", "NASA"),
            ("https://www.space.com/feeds/all", "Space.com"),
            ("https://www.sciencedaily.com/rss/all.xml", "ScienceDaily"),
            ("https://www.newscientist.com/feed/home/", "New Scientist"),
            ("https://www.polygon.com/rss/index.xml", "Polygon"),
            ("https://kotaku.com/rss", "Kotaku"),
            ("https://variety.com/feed/", "Variety"),
        ] {
            display_names.insert(loc.to_string(), name.to_string());
        }

        Self::new(categories, display_names)
    }
}

/// Host component of a URL, leading `www.` removed.
pub fn host_display_name(locator: &str) -> Option<String> {
    let parsed = url::Url::parse(locator.trim()).ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn parse_catalog(s: &str, hint_ext: &str) -> Result<CatalogFile> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing feed catalog json");
    }
    match toml::from_str::<CatalogFile>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported feed catalog format: {toml_err}")),
    }
}

/// Trim, drop blanks and repeats, keep first-seen order.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
