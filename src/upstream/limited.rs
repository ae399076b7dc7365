//! Rate-limited upstream decorator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Namespace, UpstreamClient, UpstreamError, UpstreamResult};
use crate::StagingError;
use crate::ratelimit::MultiKeyRateLimiter;

/// Admits each call through a [`MultiKeyRateLimiter`] keyed by region.
///
/// Calls wait for a free slot. A request that can never fit (weight above
/// capacity) fails with [`UpstreamError::Rejected`], which is not retried.
///
/// One admission covers one trait call. The OAuth token request and the
/// single re-send after a token refresh happen inside that call and are not
/// admitted separately: the token endpoint is outside the Game Data API
/// quota, and a re-send happens at most once per token lifetime.
pub struct RateLimitedUpstream {
    inner: Arc<dyn UpstreamClient>,
    limiter: Arc<MultiKeyRateLimiter>,
}

impl RateLimitedUpstream {
    pub fn new(inner: Arc<dyn UpstreamClient>, limiter: Arc<MultiKeyRateLimiter>) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &Arc<MultiKeyRateLimiter> {
        &self.limiter
    }

    async fn admit(&self, ns: &Namespace) -> UpstreamResult<()> {
        self.limiter
            .wait_if_needed(ns.region.as_str(), 1)
            .await
            .map_err(|e| match e {
                StagingError::RateLimited { retry_after } => UpstreamError::RateLimited {
                    retry_after: Some(retry_after),
                },
                other => UpstreamError::Rejected(other.to_string()),
            })
    }
}

#[async_trait]
impl UpstreamClient for RateLimitedUpstream {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn realm_index(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.realm_index(ns).await
    }

    async fn realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.realm(ns, slug).await
    }

    async fn search_realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.search_realm(ns, slug).await
    }

    async fn token(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.token(ns).await
    }

    async fn guild(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.guild(ns, realm, name).await
    }

    async fn guild_roster(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.guild_roster(ns, realm, name).await
    }

    async fn guild_achievements(
        &self,
        ns: &Namespace,
        realm: &str,
        name: &str,
    ) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.guild_achievements(ns, realm, name).await
    }

    async fn auctions(&self, ns: &Namespace, connected_realm_id: u64) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.auctions(ns, connected_realm_id).await
    }

    async fn character(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.admit(ns).await?;
        self.inner.character(ns, realm, name).await
    }
}
