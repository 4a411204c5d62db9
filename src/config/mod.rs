// src/config/mod.rs
pub mod feeds;

pub use feeds::{FallbackConfig, FeedsConfig};
