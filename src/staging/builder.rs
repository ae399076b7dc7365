//! Builder for [`StagingService`].

use std::sync::Arc;

use super::fetch::LiveFetcher;
use super::flight::InFlight;
use super::{StagingConfig, StagingService};
use crate::cache::{FastCache, MemoryFastCache};
use crate::ratelimit::MultiKeyRateLimiter;
use crate::store::{CollectionLogSink, MemoryStore, PersistentStore};
use crate::synthetic::SyntheticGenerator;
use crate::upstream::{RateLimitedUpstream, RetryConfig, RetryingUpstream, UpstreamClient};

/// Assembles a [`StagingService`] from its tiers.
///
/// Unset tiers default to in-process implementations. Without an upstream
/// client the live tier is skipped. The upstream client is wrapped as
/// `retry(rate_limit(client))`; retries are off unless
/// [`retry`](Self::retry) is given.
pub struct StagingServiceBuilder {
    config: StagingConfig,
    fast_cache: Option<Arc<dyn FastCache>>,
    store: Option<Arc<dyn PersistentStore>>,
    log: Option<Arc<dyn CollectionLogSink>>,
    upstream: Option<Arc<dyn UpstreamClient>>,
    retry: Option<RetryConfig>,
    rate_limiter: Option<Arc<MultiKeyRateLimiter>>,
}

impl Default for StagingServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: StagingConfig::default(),
            fast_cache: None,
            store: None,
            log: None,
            upstream: None,
            retry: None,
            rate_limiter: None,
        }
    }

    pub fn config(mut self, config: StagingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fast_cache(mut self, cache: Arc<dyn FastCache>) -> Self {
        self.fast_cache = Some(cache);
        self
    }

    /// Use one backend as both the persistent tier and the collection log.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: PersistentStore + CollectionLogSink + 'static,
    {
        self.store = Some(store.clone());
        self.log = Some(store);
        self
    }

    pub fn persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn collection_log(mut self, log: Arc<dyn CollectionLogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn upstream(mut self, client: Arc<dyn UpstreamClient>) -> Self {
        self.upstream = Some(client);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Limiter consulted before every upstream call, keyed by region.
    /// Default: 100 requests per second per region.
    pub fn rate_limiter(mut self, limiter: Arc<MultiKeyRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn build(self) -> StagingService {
        let fallback = Arc::new(MemoryStore::new());
        let store: Arc<dyn PersistentStore> = match self.store {
            Some(store) => store,
            None => fallback.clone(),
        };
        let log: Arc<dyn CollectionLogSink> = match self.log {
            Some(log) => log,
            None => fallback,
        };
        let fast_cache: Arc<dyn FastCache> = match self.fast_cache {
            Some(cache) => cache,
            None => Arc::new(MemoryFastCache::default()),
        };
        let limiter = self.rate_limiter.unwrap_or_default();

        let fetcher = self.upstream.map(|client| {
            let mut client: Arc<dyn UpstreamClient> =
                Arc::new(RateLimitedUpstream::new(client, limiter.clone()));
            if let Some(retry) = self.retry.filter(|r| r.max_attempts > 1) {
                client = Arc::new(RetryingUpstream::new(client, retry));
            }
            LiveFetcher::new(client, self.config.upstream_timeout)
        });

        StagingService {
            in_flight: self.config.single_flight.then(InFlight::new),
            config: self.config,
            fast_cache,
            store,
            log,
            fetcher,
            limiter,
            synthetic: SyntheticGenerator,
        }
    }
}
