// src/ingest/providers/mod.rs
pub mod fallback;
pub mod rss_http;

pub use fallback::JsonSearchFallback;
pub use rss_http::HttpFeedFetcher;
