//! Persistent cache tier and collection log.
//!
//! The staging chain needs three things from durable storage:
//!
//! - insert a [`CacheRecord`] (append only; history is kept),
//! - find the most recent valid, unexpired record for a [`RecordKey`],
//! - soft-invalidate everything past its expiry.
//!
//! [`CollectionLogSink`] is the append-only audit trail of upstream fetch
//! attempts. Both traits are implemented by [`MemoryStore`] and the
//! durable [`SqliteStore`].
//!
//! Every write is one unit of work: it either lands completely or leaves
//! the store unchanged.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::{CacheRecord, CollectionLogEntry, DataType, RecordKey};

/// Durable cache rows with expiry and validity.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Append a row.
    async fn insert(&self, record: CacheRecord) -> Result<()>;

    /// Most recent row for `key` that is valid and not expired at `now`.
    async fn latest_valid(&self, key: &RecordKey, now: DateTime<Utc>)
    -> Result<Option<CacheRecord>>;

    /// Mark valid rows with `expires_at < now` invalid. Returns how many
    /// rows changed.
    async fn invalidate_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Valid-row counts and latest capture time, grouped by data type.
    async fn stats(&self) -> Result<CacheStats>;
}

/// Append-only sink for [`CollectionLogEntry`] values.
#[async_trait]
pub trait CollectionLogSink: Send + Sync {
    async fn append(&self, entry: CollectionLogEntry) -> Result<()>;
}

/// Per data type persistent-cache summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    pub count: u64,
    pub latest: Option<DateTime<Utc>>,
}

/// Summary returned by [`PersistentStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_entries: BTreeMap<DataType, TypeStats>,
    pub total_cached_items: u64,
}

/// Tables behind [`MemoryStore`].
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub records: Vec<CacheRecord>,
    pub log: Vec<CollectionLogEntry>,
}

impl Tables {
    pub fn latest_valid(&self, key: &RecordKey, now: DateTime<Utc>) -> Option<CacheRecord> {
        self.records
            .iter()
            .filter(|r| &r.key == key && r.is_servable_at(now))
            .max_by_key(|r| r.captured_at)
            .cloned()
    }

    pub fn invalidate_expired(&mut self, now: DateTime<Utc>) -> u64 {
        let mut count = 0;
        for record in self.records.iter_mut().filter(|r| r.is_expired_at(now)) {
            record.is_valid = false;
            count += 1;
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for record in self.records.iter().filter(|r| r.is_valid) {
            let entry = stats.cache_entries.entry(record.key.data_type).or_default();
            entry.count += 1;
            entry.latest = entry.latest.max(Some(record.captured_at));
            stats.total_cached_items += 1;
        }
        stats
    }
}
