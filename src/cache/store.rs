// src/cache/store.rs
//! Durable tier of the feed cache: string keys, JSON values.
//!
//! Two implementations:
//! - `MemoryStore`: in-process map with an optional entry cap (tests, no cache dir).
//! - `FileStore`: one `<key>.json` file per entry with an optional byte budget.
//!
//! Both report `StoreError::CapacityExceeded` when a write would go over budget;
//! the cache reacts by evicting old entries and retrying once.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store capacity exceeded")]
    CapacityExceeded,
    #[error("durable store io: {0}")]
    Io(#[from] io::Error),
    #[error("durable store serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Value>>,
    max_entries: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_entries: Some(max),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(key)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(g.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(max) = self.max_entries {
            if !g.contains_key(key) && g.len() >= max {
                return Err(StoreError::CapacityExceeded);
            }
        }
        g.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(g.keys().cloned().collect())
    }
}

/// Directory-backed store. Writes go through a temp file and a rename.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    capacity_bytes: Option<u64>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, capacity_bytes: Option<u64>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity_bytes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    /// Bytes used by all entries except `skip`.
    async fn used_bytes(&self, skip: &Path) -> io::Result<u64> {
        let mut total = 0u64;
        let mut rd = tokio::fs::read_dir(&self.dir).await?;
        while let Some(e) = rd.next_entry().await? {
            let p = e.path();
            if p == skip || p.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            total += e.metadata().await?.len();
        }
        Ok(total)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let json = serde_json::to_string(value)?;
        if let Some(cap) = self.capacity_bytes {
            let used = self.used_bytes(&path).await?;
            if used + json.len() as u64 > cap {
                return Err(StoreError::CapacityExceeded);
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.dir).await?;
        while let Some(e) = rd.next_entry().await? {
            let name = e.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json") {
                if let Some(key) = decode_key(stem) {
                    out.push(key);
                }
            }
        }
        Ok(out)
    }
}

/// Reversible filename encoding: `[A-Za-z0-9_-]` kept, other bytes as `%XX`.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
