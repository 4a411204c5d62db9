// src/ingest/providers/fallback.rs
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::ingest::types::{FallbackSource, FetchError, RawFeedItem};

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    author: Option<String>,
    pub_date: Option<String>,
    source: Option<String>,
}

/// Aggregator search API used when the configured feeds return too little.
///
/// `GET <base_url>?q=<query>&count=<limit>` answering
/// `{"items": [{"title", "link", "description", "thumbnail", "author", "pubDate", "guid", "source"}]}`.
pub struct JsonSearchFallback {
    base_url: String,
    client: reqwest::Client,
}

impl JsonSearchFallback {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim().to_string(),
            client,
        })
    }
}

#[async_trait]
impl FallbackSource for JsonSearchFallback {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawFeedItem>, FetchError> {
        let count = limit.to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body: SearchResp = resp
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("fallback json: {e}")))?;

        let items = body
            .items
            .into_iter()
            .take(limit)
            .map(|it| RawFeedItem {
                title: it.title,
                link: it.link,
                guid: it.guid,
                description: it.description,
                content: None,
                creators: it.author.into_iter().collect(),
                thumbnails: it.thumbnail.into_iter().collect(),
                date_candidates: it.pub_date.into_iter().collect(),
                source: it.source.unwrap_or_else(|| self.base_url.clone()),
            })
            .collect();
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "json-search"
    }
}
