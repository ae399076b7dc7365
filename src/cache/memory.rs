//! In-process fast cache with per-entry TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::FastCache;
use crate::Result;

/// Configuration for [`MemoryFastCache`].
///
/// ```rust
/// # use wowstage::FastCacheConfig;
/// let config = FastCacheConfig::new().max_entries(50_000);
/// assert_eq!(config.max_entries, 50_000);
/// ```
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct FastCacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
}

impl Default for FastCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

impl FastCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

#[derive(Clone)]
struct Entry {
    value: Arc<[u8]>,
    ttl: Duration,
}

/// Expire each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-backed [`FastCache`]. Bounded LRU; each entry carries its own TTL.
pub struct MemoryFastCache {
    cache: Cache<String, Entry>,
}

impl MemoryFastCache {
    pub fn new(config: &FastCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    /// Number of entries currently held (approximate, as reported by moka).
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop one key.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for MemoryFastCache {
    fn default() -> Self {
        Self::new(&FastCacheConfig::default())
    }
}

#[async_trait]
impl FastCache for MemoryFastCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|e| e.value.to_vec()))
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<()> {
        self.cache
            .insert(
                key.to_string(),
                Entry {
                    value: value.into(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }
}
