//! Persistent-tier rows and collection log entries.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::key::{DataType, RecordKey, Region};
use crate::{Result, StagingError};

/// Longest lifetime a row can be given. Longer TTLs are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Where a cached payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Live,
    Synthetic,
    Manual,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Live => "live",
            RecordSource::Synthetic => "synthetic",
            RecordSource::Manual => "manual",
        }
    }
}

impl FromStr for RecordSource {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live" => Ok(RecordSource::Live),
            "synthetic" => Ok(RecordSource::Synthetic),
            "manual" => Ok(RecordSource::Manual),
            _ => Err(StagingError::InvalidInput(format!("unknown record source '{s}'"))),
        }
    }
}

/// One row of the persistent cache.
///
/// Several rows may exist per [`RecordKey`]; reads select the most recent
/// valid, unexpired one. Invalid rows are kept for history only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: Uuid,
    pub key: RecordKey,
    pub payload: serde_json::Value,
    pub captured_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_valid: bool,
    pub source: RecordSource,
}

impl CacheRecord {
    /// Create a valid record captured at `now`, expiring after `ttl` if given.
    /// `ttl` is clamped to [`MAX_TTL`].
    pub fn new(
        key: RecordKey,
        payload: serde_json::Value,
        source: RecordSource,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        let expires_at = ttl.map(|ttl| expiry(now, ttl));
        Self {
            id: Uuid::new_v4(),
            key,
            payload,
            captured_at: now,
            expires_at,
            is_valid: true,
            source,
        }
    }

    /// Whether a read at `now` may return this row.
    pub fn is_servable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_valid && self.expires_at.is_none_or(|expires| expires > now)
    }

    /// Whether a cleanup sweep at `now` should invalidate this row.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_valid && self.expires_at.is_some_and(|expires| expires < now)
    }

    /// Time left before expiry, or `None` for rows that never expire.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires| (expires - now).to_std().unwrap_or(Duration::ZERO))
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl.min(MAX_TTL))
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Outcome of one upstream collection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Success,
    Failed,
    /// Upstream answered but some sub-requests (e.g. member profiles) failed.
    Partial,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Success => "success",
            CollectionStatus::Failed => "failed",
            CollectionStatus::Partial => "partial",
        }
    }
}

impl FromStr for CollectionStatus {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(CollectionStatus::Success),
            "failed" => Ok(CollectionStatus::Failed),
            "partial" => Ok(CollectionStatus::Partial),
            _ => Err(StagingError::InvalidInput(format!("unknown collection status '{s}'"))),
        }
    }
}

/// Immutable record of one upstream fetch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionLogEntry {
    pub id: Uuid,
    pub collection_type: DataType,
    pub target: String,
    pub region: Region,
    pub status: CollectionStatus,
    pub error_message: Option<String>,
    pub records_collected: u64,
    pub execution_time_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl CollectionLogEntry {
    pub fn success(
        collection_type: DataType,
        target: impl Into<String>,
        region: Region,
        records_collected: u64,
    ) -> Self {
        Self::new(
            collection_type,
            target,
            region,
            CollectionStatus::Success,
            None,
            records_collected,
        )
    }

    pub fn failed(
        collection_type: DataType,
        target: impl Into<String>,
        region: Region,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            collection_type,
            target,
            region,
            CollectionStatus::Failed,
            Some(error.into()),
            0,
        )
    }

    fn new(
        collection_type: DataType,
        target: impl Into<String>,
        region: Region,
        status: CollectionStatus,
        error_message: Option<String>,
        records_collected: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection_type,
            target: target.into(),
            region,
            status,
            error_message,
            records_collected,
            execution_time_ms: None,
            timestamp: Utc::now(),
        }
    }

    pub fn status(mut self, status: CollectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = Some(elapsed.as_millis() as u64);
        self
    }
}
