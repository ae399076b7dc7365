//! In-memory persistent tier, for tests and single-process deployments.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CacheStats, CollectionLogSink, PersistentStore, Tables};
use crate::types::{CacheRecord, CollectionLogEntry, RecordKey};
use crate::{Result, StagingError};

/// Process-local store. Data is lost on exit; see
/// [`SqliteStore`](super::SqliteStore) for a durable variant.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StagingError::Store("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StagingError::Store("memory store lock poisoned".to_string()))
    }

    /// Every row, including invalid ones, in insertion order.
    pub fn records(&self) -> Vec<CacheRecord> {
        self.read().map(|t| t.records.clone()).unwrap_or_default()
    }

    /// Every collection log entry, in append order.
    pub fn log_entries(&self) -> Vec<CollectionLogEntry> {
        self.read().map(|t| t.log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn insert(&self, record: CacheRecord) -> Result<()> {
        self.write()?.records.push(record);
        Ok(())
    }

    async fn latest_valid(
        &self,
        key: &RecordKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheRecord>> {
        Ok(self.read()?.latest_valid(key, now))
    }

    async fn invalidate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.write()?.invalidate_expired(now))
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(self.read()?.stats())
    }
}

#[async_trait]
impl CollectionLogSink for MemoryStore {
    async fn append(&self, entry: CollectionLogEntry) -> Result<()> {
        self.write()?.log.push(entry);
        Ok(())
    }
}
