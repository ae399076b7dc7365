//! Retry policy and the retrying upstream decorator.
//!
//! Every [`UpstreamClient`] operation of [`RetryingUpstream`] goes through
//! the shared `with_retry()` helper, so the backoff rules live in one place.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{Namespace, UpstreamClient, UpstreamResult};
use crate::telemetry;

/// Exponential backoff settings for transient upstream errors.
///
/// ```rust
/// # use wowstage::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first request. 1 disables retries. Default: 3.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 500ms.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Cap on the exponential delay. Default: 30s.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay`. `attempt` is 0-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Backoff for `attempt`, unless the upstream said how long to wait.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    client: &str,
    operation: &str,
    f: F,
) -> UpstreamResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = UpstreamResult<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = config.effective_delay(attempt, e.retry_after());
                metrics::counter!(telemetry::RETRIES_TOTAL,
                    "client" => client.to_owned(),
                    "operation" => operation.to_owned(),
                )
                .increment(1);
                warn!(
                    client,
                    operation,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decorator retrying transient [`UpstreamError`](super::UpstreamError)s
/// with exponential backoff.
///
/// Not-found, authentication and 4xx errors pass through on the first try.
pub struct RetryingUpstream {
    inner: Arc<dyn UpstreamClient>,
    config: RetryConfig,
}

impl RetryingUpstream {
    pub fn new(inner: Arc<dyn UpstreamClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn run<F, Fut>(&self, operation: &str, f: F) -> UpstreamResult<Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = UpstreamResult<Value>>,
    {
        with_retry(&self.config, self.inner.name(), operation, f).await
    }
}

#[async_trait]
impl UpstreamClient for RetryingUpstream {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn realm_index(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.run("realm_index", || self.inner.realm_index(ns)).await
    }

    async fn realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        self.run("realm", || self.inner.realm(ns, slug)).await
    }

    async fn search_realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        self.run("search_realm", || self.inner.search_realm(ns, slug))
            .await
    }

    async fn token(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.run("token", || self.inner.token(ns)).await
    }

    async fn guild(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.run("guild", || self.inner.guild(ns, realm, name)).await
    }

    async fn guild_roster(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.run("guild_roster", || self.inner.guild_roster(ns, realm, name))
            .await
    }

    async fn guild_achievements(
        &self,
        ns: &Namespace,
        realm: &str,
        name: &str,
    ) -> UpstreamResult<Value> {
        self.run("guild_achievements", || {
            self.inner.guild_achievements(ns, realm, name)
        })
        .await
    }

    async fn auctions(&self, ns: &Namespace, connected_realm_id: u64) -> UpstreamResult<Value> {
        self.run("auctions", || self.inner.auctions(ns, connected_realm_id))
            .await
    }

    async fn character(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        self.run("character", || self.inner.character(ns, realm, name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(30), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_hint_wins() {
        let config = RetryConfig::new();
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn deserializes_millis() {
        let config: RetryConfig =
            toml::from_str("max_attempts = 4\ninitial_delay_ms = 250").unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }
}
