// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::bootstrap::FeedRuntime;
pub use crate::cache::{CacheOutcome, CacheState, FeedCache};
pub use crate::catalog::Catalog;
pub use crate::ingest::abort::{AbortHandle, AbortSignal};
pub use crate::ingest::types::{FeedBundle, FeedItem, FeedRequest};
pub use crate::ingest::Aggregator;
