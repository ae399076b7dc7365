//! The staging chain: fast cache → persistent cache → live → synthetic.
//!
//! [`StagingService::get_data`] never fails. Each tier is tried in order and
//! the first hit wins; a persistent hit is promoted into the fast cache and a
//! live hit is written through to both. When no real tier can answer, a
//! synthetic placeholder is returned, tagged as such.
//!
//! Tier errors are logged and treated as misses. Upstream attempts (success
//! or failure) are recorded in the collection log.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> wowstage::Result<()> {
//! use std::sync::Arc;
//! use wowstage::{
//!     BlizzardClient, BlizzardCredentials, DataRequest, MemoryStore, StagingService, Target,
//! };
//!
//! let client = BlizzardClient::new(BlizzardCredentials::new("id", "secret"))?;
//! let service = StagingService::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .upstream(Arc::new(client))
//!     .build();
//!
//! let payload = service
//!     .get_data(&DataRequest::new(Target::guild("stormrage", "Knights of Ni")?))
//!     .await;
//! println!("{} (synthetic: {})", payload.data, payload.is_synthetic());
//! # Ok(())
//! # }
//! ```

mod builder;
mod fetch;
mod flight;

pub use builder::StagingServiceBuilder;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::{FastCache, TtlPolicy};
use crate::ratelimit::{MultiKeyRateLimiter, RateLimitStatus};
use crate::store::{CacheStats, CollectionLogSink, PersistentStore};
use crate::synthetic::SyntheticGenerator;
use crate::telemetry;
use crate::types::{
    CacheRecord, CollectionLogEntry, DataRequest, DataType, GameVersion, RecordKey, RecordSource,
    Region, StagedPayload, Target, Tier,
};
use crate::{Result, StagingError};

use fetch::LiveFetcher;
use flight::InFlight;

/// Behaviour of a [`StagingService`].
///
/// ```rust
/// # use wowstage::{GameVersion, StagingConfig};
/// # use std::time::Duration;
/// let config = StagingConfig::default()
///     .game_version(GameVersion::Retail)
///     .seed_delay(Duration::ZERO);
/// assert!(config.single_flight);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StagingConfig {
    /// Used when a request does not name one. Default: classic.
    pub game_version: GameVersion,
    pub ttl: TtlPolicy,
    /// Bound on each upstream call, including its retries and limiter wait.
    /// A guild fetch makes one call per member, each bounded separately.
    /// Default: 10s.
    pub upstream_timeout: Duration,
    /// Pause between seed attempts. Default: 500ms.
    pub seed_delay: Duration,
    /// Collapse concurrent cold fetches of one key. Default: true.
    pub single_flight: bool,
    /// Realm assumed for seed targets that do not name one.
    pub default_realm: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            game_version: GameVersion::default(),
            ttl: TtlPolicy::default(),
            upstream_timeout: Duration::from_secs(10),
            seed_delay: Duration::from_millis(500),
            single_flight: true,
            default_realm: "stormrage".to_string(),
        }
    }
}

impl StagingConfig {
    pub fn game_version(mut self, version: GameVersion) -> Self {
        self.game_version = version;
        self
    }

    pub fn ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn seed_delay(mut self, delay: Duration) -> Self {
        self.seed_delay = delay;
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn default_realm(mut self, realm: impl Into<String>) -> Self {
        self.default_realm = realm.into();
        self
    }
}

/// A seed subject, crossed with every data type passed to
/// [`StagingService::seed_data`].
///
/// `name` is a realm slug for realm and auction lookups and a guild or
/// character name otherwise. Guild and character lookups without a realm
/// use the configured default realm.
///
/// ```rust
/// # use wowstage::SeedTarget;
/// let target = SeedTarget::new("Knights: Of Ni").on_realm("mankrik");
/// assert_eq!(target.to_string(), "mankrik:Knights: Of Ni");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTarget {
    pub name: String,
    pub realm: Option<String>,
}

impl SeedTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: None,
        }
    }

    pub fn on_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }
}

impl fmt::Display for SeedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.realm {
            Some(realm) => write!(f, "{realm}:{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Outcome of [`StagingService::seed_data`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Targets that now hold live data, as `data_type:cache_key`.
    pub succeeded: BTreeSet<String>,
    /// `(target, reason)` for targets that could not be seeded.
    pub failed: Vec<(String, String)>,
    pub total_records: u64,
}

/// Fast cache value: the payload plus its original capture time.
#[derive(Serialize, Deserialize)]
struct FastEntry {
    data: Value,
    captured_at: DateTime<Utc>,
}

/// Multi-tier read-through service for game data.
pub struct StagingService {
    config: StagingConfig,
    fast_cache: Arc<dyn FastCache>,
    store: Arc<dyn PersistentStore>,
    log: Arc<dyn CollectionLogSink>,
    fetcher: Option<LiveFetcher>,
    limiter: Arc<MultiKeyRateLimiter>,
    in_flight: Option<InFlight>,
    synthetic: SyntheticGenerator,
}

impl StagingService {
    pub fn builder() -> StagingServiceBuilder {
        StagingServiceBuilder::new()
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Whether a live tier is configured.
    pub fn has_upstream(&self) -> bool {
        self.fetcher.is_some()
    }

    /// Resolve `request` through the tier chain. Never fails.
    #[instrument(
        skip(self, request),
        fields(data_type = %request.target.data_type(), key = %request.target.cache_key(), region = %request.region)
    )]
    pub async fn get_data(&self, request: &DataRequest) -> StagedPayload {
        self.stage(request).await.0
    }

    /// Like [`get_data`](Self::get_data), also returning why the live tier
    /// did not answer when the result is synthetic.
    async fn stage(&self, request: &DataRequest) -> (StagedPayload, Option<String>) {
        let version = request.game_version.unwrap_or(self.config.game_version);
        let key = RecordKey::new(&request.target, request.region, version);
        let fast_key = key.fast_key();

        if !request.force_refresh {
            if let Some(payload) = self.read_fast(&fast_key, key.data_type).await {
                return (payload, None);
            }
            if let Some(payload) = self.read_persistent(&key, &fast_key).await {
                return (payload, None);
            }
        }

        let Some(fetcher) = &self.fetcher else {
            debug!("no upstream configured");
            return (
                self.serve_synthetic(&request.target),
                Some("no upstream configured".to_string()),
            );
        };

        // Held until the live result is written through.
        let flight = match &self.in_flight {
            Some(in_flight) => Some(in_flight.lock(&fast_key).await),
            None => None,
        };
        if flight.is_some()
            && !request.force_refresh
            && let Some(payload) = self.read_fast(&fast_key, key.data_type).await
        {
            return (payload, None);
        }

        match self.read_live(fetcher, request, &key, &fast_key).await {
            Ok(payload) => (payload, None),
            Err(reason) => (self.serve_synthetic(&request.target), Some(reason)),
        }
    }

    async fn read_fast(&self, fast_key: &str, data_type: DataType) -> Option<StagedPayload> {
        let bytes = match self.fast_cache.get(fast_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                cache_error("fast_cache", "read", &e);
                return None;
            }
        };
        match serde_json::from_slice::<FastEntry>(&bytes) {
            Ok(entry) => {
                debug!(key = fast_key, "fast cache hit");
                record_hit(Tier::FastCache, data_type);
                Some(StagedPayload::cached(
                    entry.data,
                    Tier::FastCache,
                    entry.captured_at,
                    Utc::now(),
                ))
            }
            Err(e) => {
                cache_error("fast_cache", "read", &StagingError::Json(e));
                None
            }
        }
    }

    async fn read_persistent(&self, key: &RecordKey, fast_key: &str) -> Option<StagedPayload> {
        let now = Utc::now();
        let record = match self.store.latest_valid(key, now).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                cache_error("persistent_cache", "read", &e);
                return None;
            }
        };
        debug!(key = fast_key, "persistent cache hit");

        let ttl = match record.remaining_lifetime(now) {
            Some(remaining) => remaining.min(self.config.ttl.ttl_for(key.data_type)),
            None => self.config.ttl.ttl_for(key.data_type),
        };
        if !ttl.is_zero() {
            self.write_fast(fast_key, &record.payload, record.captured_at, ttl)
                .await;
        }

        record_hit(Tier::PersistentCache, key.data_type);
        Some(StagedPayload::cached(
            record.payload,
            Tier::PersistentCache,
            record.captured_at,
            now,
        ))
    }

    async fn read_live(
        &self,
        fetcher: &LiveFetcher,
        request: &DataRequest,
        key: &RecordKey,
        fast_key: &str,
    ) -> std::result::Result<StagedPayload, String> {
        let start = Instant::now();
        let result = fetcher
            .fetch(&request.target, key.region, key.game_version)
            .await;
        let elapsed = start.elapsed();
        record_upstream(key.data_type, elapsed, result.is_ok());

        match result {
            Ok(fetched) => {
                info!(
                    client = fetcher.client_name(),
                    records = fetched.records,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "live fetch succeeded"
                );
                let now = Utc::now();
                self.write_through(key, fast_key, &fetched.data, RecordSource::Live, now)
                    .await;
                self.append_log(
                    CollectionLogEntry::success(
                        key.data_type,
                        &key.cache_key,
                        key.region,
                        fetched.records,
                    )
                    .status(fetched.status)
                    .execution_time(elapsed),
                )
                .await;
                record_hit(Tier::Live, key.data_type);
                Ok(StagedPayload::live(fetched.data, now))
            }
            Err(e) => {
                warn!(client = fetcher.client_name(), error = %e, "live fetch failed");
                self.append_log(
                    CollectionLogEntry::failed(
                        key.data_type,
                        &key.cache_key,
                        key.region,
                        e.to_string(),
                    )
                    .execution_time(elapsed),
                )
                .await;
                Err(e.to_string())
            }
        }
    }

    fn serve_synthetic(&self, target: &Target) -> StagedPayload {
        info!("serving synthetic data");
        record_hit(Tier::Synthetic, target.data_type());
        self.synthetic.generate(target, Utc::now())
    }

    async fn write_fast(&self, fast_key: &str, data: &Value, captured_at: DateTime<Utc>, ttl: Duration) {
        let entry = FastEntry {
            data: data.clone(),
            captured_at,
        };
        let result = match serde_json::to_vec(&entry) {
            Ok(bytes) => self.fast_cache.setex(fast_key, ttl, bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            cache_error("fast_cache", "write", &e);
        }
    }

    async fn write_through(
        &self,
        key: &RecordKey,
        fast_key: &str,
        data: &Value,
        source: RecordSource,
        now: DateTime<Utc>,
    ) {
        let ttl = self.config.ttl.ttl_for(key.data_type);
        self.write_fast(fast_key, data, now, ttl).await;
        let record = CacheRecord::new(key.clone(), data.clone(), source, now, Some(ttl));
        if let Err(e) = self.store.insert(record).await {
            cache_error("persistent_cache", "write", &e);
        }
    }

    async fn append_log(&self, entry: CollectionLogEntry) {
        if let Err(e) = self.log.append(entry).await {
            warn!(error = %e, "failed to append collection log entry");
        }
    }

    /// Force-refresh every `(data_type, target)` pair and report which now
    /// hold live data.
    ///
    /// Pairs that resolve to the same cache key are attempted once.
    #[instrument(skip(self, data_types, targets), fields(region = %region))]
    pub async fn seed_data(
        &self,
        data_types: &[DataType],
        targets: &[SeedTarget],
        region: Region,
    ) -> SeedReport {
        let mut report = SeedReport::default();
        let mut seen = HashSet::new();
        let mut first = true;

        for &data_type in data_types {
            for seed in targets {
                let target = match self.seed_target(data_type, seed) {
                    Ok(target) => target,
                    Err(e) => {
                        report.failed.push((format!("{data_type}:{seed}"), e.to_string()));
                        continue;
                    }
                };
                if !seen.insert(RecordKey::new(&target, region, self.config.game_version)) {
                    continue;
                }

                if !first && !self.config.seed_delay.is_zero() {
                    tokio::time::sleep(self.config.seed_delay).await;
                }
                first = false;

                let label = target.to_string();
                let request = DataRequest::new(target).region(region).force_refresh(true);
                let (payload, reason) = self.stage(&request).await;
                if payload.is_synthetic() {
                    let reason = reason.unwrap_or_else(|| "live data unavailable".to_string());
                    report.failed.push((label, reason));
                } else {
                    report.total_records += records_in(&request.target, &payload.data);
                    report.succeeded.insert(label);
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            total_records = report.total_records,
            "seeding finished"
        );
        report
    }

    fn seed_target(&self, data_type: DataType, seed: &SeedTarget) -> Result<Target> {
        let realm = match data_type {
            DataType::Guild | DataType::Character => Some(
                seed.realm
                    .as_deref()
                    .unwrap_or(self.config.default_realm.as_str()),
            ),
            _ => seed.realm.as_deref(),
        };
        Target::from_parts(data_type, Some(&seed.name), realm)
    }

    /// Valid persistent rows grouped by data type.
    pub async fn get_cache_stats(&self) -> Result<CacheStats> {
        self.store.stats().await
    }

    /// Invalidate persistent rows past their expiry. Returns how many rows
    /// changed; a second sweep at the same instant changes none.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_cache(&self) -> Result<u64> {
        let count = self.store.invalidate_expired(Utc::now()).await?;
        info!(count, "invalidated expired cache entries");
        Ok(count)
    }

    /// Store operator-supplied data for `target` in both cache tiers.
    #[instrument(skip(self, data), fields(target = %target, region = %region))]
    pub async fn import_manual(
        &self,
        target: &Target,
        region: Region,
        game_version: Option<GameVersion>,
        data: Value,
    ) -> Result<CacheRecord> {
        let version = game_version.unwrap_or(self.config.game_version);
        let key = RecordKey::new(target, region, version);
        let ttl = self.config.ttl.ttl_for(key.data_type);
        let now = Utc::now();

        let record = CacheRecord::new(key.clone(), data, RecordSource::Manual, now, Some(ttl));
        self.store.insert(record.clone()).await?;

        let entry = FastEntry {
            data: record.payload.clone(),
            captured_at: now,
        };
        self.fast_cache
            .setex(&key.fast_key(), ttl, serde_json::to_vec(&entry)?)
            .await?;
        info!("imported manual data");
        Ok(record)
    }

    /// Snapshot of the upstream limiter for `key` (a region code), if that
    /// key has been used.
    pub fn rate_limit_status(&self, key: &str) -> Option<RateLimitStatus> {
        self.limiter.status(key)
    }

    pub fn rate_limiter(&self) -> &Arc<MultiKeyRateLimiter> {
        &self.limiter
    }
}

/// Records a seeded payload contributes: listings for auctions, members for
/// guilds, one otherwise.
fn records_in(target: &Target, data: &Value) -> u64 {
    let count = |field: &str| {
        data.get(field)
            .and_then(Value::as_array)
            .map_or(0, |a| a.len() as u64)
    };
    match target {
        Target::Auction { .. } => count("auctions"),
        Target::Guild { .. } => count("members_data"),
        _ => 1,
    }
}

fn record_hit(tier: Tier, data_type: DataType) {
    metrics::counter!(telemetry::TIER_HITS_TOTAL,
        "tier" => tier.as_str(),
        "data_type" => data_type.as_str(),
    )
    .increment(1);
}

fn record_upstream(data_type: DataType, elapsed: Duration, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::UPSTREAM_REQUESTS_TOTAL,
        "data_type" => data_type.as_str(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS,
        "data_type" => data_type.as_str(),
    )
    .record(elapsed.as_secs_f64());
}

fn cache_error(tier: &'static str, op: &'static str, error: &StagingError) {
    warn!(tier, op, error = %error, "cache tier error, treating as miss");
    metrics::counter!(telemetry::CACHE_ERRORS_TOTAL, "tier" => tier, "op" => op).increment(1);
}
