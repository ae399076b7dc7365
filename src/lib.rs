//! wowstage - Multi-tier staging cache for World of Warcraft game data
//!
//! Reads go through an ordered chain of tiers: an in-process fast cache, a
//! persistent cache, the live Battle.net API (guarded by a sliding-window
//! rate limiter) and, when nothing else answers, a synthetic placeholder.
//! A read never fails; the returned [`StagedPayload`] says which tier
//! produced it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wowstage::{
//!     BlizzardClient, BlizzardCredentials, DataRequest, Region, RetryConfig, SqliteStore,
//!     StagingService, Target,
//! };
//!
//! #[tokio::main]
//! async fn main() -> wowstage::Result<()> {
//!     let client = BlizzardClient::new(BlizzardCredentials::new("client-id", "client-secret"))?;
//!     let service = StagingService::builder()
//!         .store(Arc::new(SqliteStore::open("cache.db")?))
//!         .upstream(Arc::new(client))
//!         .retry(RetryConfig::default())
//!         .build();
//!
//!     let token = service
//!         .get_data(&DataRequest::new(Target::Token).region(Region::Eu))
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&token)?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod staging;
pub mod store;
pub mod synthetic;
pub mod telemetry;
pub mod types;
pub mod upstream;

// Re-export main types at crate root
pub use cache::{FastCache, FastCacheConfig, MemoryFastCache, TtlPolicy};
pub use error::{Result, StagingError};
pub use ratelimit::{MultiKeyRateLimiter, RateLimitConfig, RateLimitStatus, RateLimiter};
pub use staging::{SeedReport, SeedTarget, StagingConfig, StagingService, StagingServiceBuilder};
pub use store::{
    CacheStats, CollectionLogSink, MemoryStore, PersistentStore, SqliteStore, TypeStats,
};
pub use synthetic::{Placeholder, SyntheticGenerator};
pub use upstream::{
    BlizzardClient, BlizzardCredentials, Namespace, NamespaceKind, RateLimitedUpstream,
    RetryConfig, RetryingUpstream, UpstreamClient, UpstreamError, UpstreamResult,
};

pub use types::{
    CacheRecord, CollectionLogEntry, CollectionStatus, DataRequest, DataType, GameVersion, MAX_TTL,
    RealmSlug, RecordKey, RecordSource, Region, StagedPayload, Target, Tier,
};
