//! Fast cache tier.
//!
//! - [`FastCache`]: the contract the staging chain needs from a low-latency
//!   key-value store: `get` and `setex` with a per-entry TTL. A redis-backed
//!   implementation fits behind the same trait.
//!
//! - [`MemoryFastCache`]: in-process moka cache with per-entry expiry,
//!   used by default.
//!
//! - [`TtlPolicy`]: per-[`DataType`] freshness table shared by the fast and
//!   persistent tiers.

mod memory;

pub use memory::{FastCacheConfig, MemoryFastCache};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{DataType, MAX_TTL};
use crate::{Result, StagingError};

/// Low-latency key-value store with per-entry TTL.
///
/// Errors are reported, never panicked on; the staging chain treats any
/// error as a miss.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Fetch the raw value stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`, replacing any previous value.
    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<()>;
}

/// Freshness per data type, in seconds.
///
/// Defaults follow upstream refresh cadence: auction houses update hourly,
/// realm metadata rarely changes, token prices move every ~20 minutes.
///
/// ```rust
/// # use wowstage::{DataType, TtlPolicy};
/// # use std::time::Duration;
/// let ttl = TtlPolicy::default().with(DataType::Token, Duration::from_secs(600));
/// assert_eq!(ttl.ttl_for(DataType::Token), Duration::from_secs(600));
/// assert_eq!(ttl.ttl_for(DataType::Auction), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub auction: u64,
    pub guild: u64,
    pub realm: u64,
    pub character: u64,
    pub token: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            auction: 3600,
            guild: 6 * 3600,
            realm: 24 * 3600,
            character: 2 * 3600,
            token: 1800,
        }
    }
}

impl TtlPolicy {
    /// TTL for `data_type`, clamped to [`MAX_TTL`].
    pub fn ttl_for(&self, data_type: DataType) -> Duration {
        Duration::from_secs(self.secs(data_type)).min(MAX_TTL)
    }

    fn secs(&self, data_type: DataType) -> u64 {
        match data_type {
            DataType::Auction => self.auction,
            DataType::Guild => self.guild,
            DataType::Realm => self.realm,
            DataType::Character => self.character,
            DataType::Token => self.token,
        }
    }

    /// Every TTL must be between one second and [`MAX_TTL`].
    pub fn validate(&self) -> Result<()> {
        for data_type in DataType::ALL {
            let secs = self.secs(data_type);
            if secs == 0 || secs > MAX_TTL.as_secs() {
                return Err(StagingError::Configuration(format!(
                    "ttl.{data_type}: {secs}s is outside 1..={}s",
                    MAX_TTL.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// Override the TTL for one data type (whole seconds).
    pub fn with(mut self, data_type: DataType, ttl: Duration) -> Self {
        let secs = ttl.as_secs();
        match data_type {
            DataType::Auction => self.auction = secs,
            DataType::Guild => self.guild = secs,
            DataType::Realm => self.realm = secs,
            DataType::Character => self.character = secs,
            DataType::Token => self.token = secs,
        }
        self
    }
}
