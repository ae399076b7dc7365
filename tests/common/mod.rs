//! Scripted upstream client and failing cache tiers shared by the staging
//! tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use wowstage::upstream::{Namespace, UpstreamClient, UpstreamError, UpstreamResult};
use wowstage::{
    CacheRecord, CacheStats, CollectionLogEntry, CollectionLogSink, FastCache, PersistentStore,
    RecordKey, Result, StagingError,
};

/// Upstream that answers every endpoint with canned JSON.
///
/// Every call is counted and recorded as `"{operation} {namespace}"`.
/// `fail_with` makes every call fail; `failing_members` makes that many
/// character lookups fail before the rest succeed.
pub struct MockUpstream {
    pub calls: AtomicU32,
    pub log: Mutex<Vec<String>>,
    pub fail_with: Option<fn() -> UpstreamError>,
    pub failing_members: AtomicU32,
    pub delay: Duration,
    pub roster_size: usize,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
            fail_with: None,
            failing_members: AtomicU32::new(0),
            delay: Duration::ZERO,
            roster_size: 20,
        }
    }

    pub fn failing(fail_with: fn() -> UpstreamError) -> Self {
        Self {
            fail_with: Some(fail_with),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_roster(mut self, size: usize) -> Self {
        self.roster_size = size;
        self
    }

    pub fn with_failing_members(self, n: u32) -> Self {
        self.failing_members.store(n, Ordering::Relaxed);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn recorded(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn call(&self, operation: &str, ns: &Namespace) -> UpstreamResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.log.lock().unwrap().push(format!("{operation} {ns}"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.fail_with {
            Some(fail) => Err(fail()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    fn name(&self) -> &str {
        "mock"
    }

    async fn realm_index(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.call("realm_index", ns).await?;
        Ok(json!({"realms": [{"slug": "stormrage"}, {"slug": "area-52"}]}))
    }

    async fn realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        self.call("realm", ns).await?;
        Ok(json!({
            "slug": slug,
            "name": "Stormrage",
            "connected_realm": {
                "href": "https://us.api.blizzard.com/data/wow/connected-realm/60?namespace=dynamic-us"
            }
        }))
    }

    async fn token(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.call("token", ns).await?;
        Ok(json!({"price": 3_120_000, "last_updated_timestamp": 1_700_000_000_000_i64}))
    }

    async fn guild(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.call("guild", ns).await?;
        Ok(json!({
            "name": name,
            "realm": {"slug": realm},
            "member_count": self.roster_size,
        }))
    }

    async fn guild_roster(
        &self,
        ns: &Namespace,
        realm: &str,
        _name: &str,
    ) -> UpstreamResult<Value> {
        self.call("guild_roster", ns).await?;
        let members: Vec<Value> = (0..self.roster_size)
            .map(|i| {
                json!({
                    "character": {
                        "name": format!("Member{i}"),
                        "level": 80,
                        "realm": {"slug": realm},
                    },
                    "rank": i % 3,
                })
            })
            .collect();
        Ok(json!({"members": members}))
    }

    async fn guild_achievements(
        &self,
        ns: &Namespace,
        _realm: &str,
        _name: &str,
    ) -> UpstreamResult<Value> {
        self.call("guild_achievements", ns).await?;
        Ok(json!({"total_points": 2_450}))
    }

    async fn auctions(&self, ns: &Namespace, connected_realm_id: u64) -> UpstreamResult<Value> {
        self.call("auctions", ns).await?;
        Ok(json!({
            "connected_realm": {"id": connected_realm_id},
            "auctions": [
                {"id": 1, "item": {"id": 19019}, "buyout": 10_000_000, "quantity": 1},
                {"id": 2, "item": {"id": 2589}, "unit_price": 1_200, "quantity": 20},
                {"id": 3, "item": {"id": 2589}, "unit_price": 1_150, "quantity": 5},
            ]
        }))
    }

    async fn character(&self, ns: &Namespace, _realm: &str, name: &str) -> UpstreamResult<Value> {
        self.call("character", ns).await?;
        let failing = self.failing_members.load(Ordering::Relaxed);
        if failing > 0 {
            self.failing_members.store(failing - 1, Ordering::Relaxed);
            return Err(UpstreamError::NotFound(format!("character {name}")));
        }
        Ok(json!({"name": name, "level": 80, "equipped_item_level": 610}))
    }
}

/// Persistent tier whose every read and write fails.
pub struct FailingStore;

#[async_trait]
impl PersistentStore for FailingStore {
    async fn insert(&self, _record: CacheRecord) -> Result<()> {
        Err(StagingError::Store("disk full".into()))
    }

    async fn latest_valid(
        &self,
        _key: &RecordKey,
        _now: DateTime<Utc>,
    ) -> Result<Option<CacheRecord>> {
        Err(StagingError::Store("database is locked".into()))
    }

    async fn invalidate_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Err(StagingError::Store("database is locked".into()))
    }

    async fn stats(&self) -> Result<CacheStats> {
        Err(StagingError::Store("database is locked".into()))
    }
}

#[async_trait]
impl CollectionLogSink for FailingStore {
    async fn append(&self, _entry: CollectionLogEntry) -> Result<()> {
        Err(StagingError::Store("disk full".into()))
    }
}

/// Fast cache that is unreachable.
pub struct FailingFastCache;

#[async_trait]
impl FastCache for FailingFastCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(StagingError::FastCache("connection refused".into()))
    }

    async fn setex(&self, _key: &str, _ttl: Duration, _value: Vec<u8>) -> Result<()> {
        Err(StagingError::FastCache("connection refused".into()))
    }
}
