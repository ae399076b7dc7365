//! Sliding-window admission control for upstream calls.
//!
//! [`RateLimiter`] tracks individual request timestamps (not fixed buckets)
//! and admits a request only if it fits in the window *before* recording it.
//! After a rejection the limiter stays "limited" until the computed
//! `retry_after` elapses, and every call in that period fails immediately
//! without re-scanning the window.
//!
//! [`MultiKeyRateLimiter`] keeps one independent limiter per key (region,
//! endpoint, ...), created lazily.

mod multi;

pub use multi::MultiKeyRateLimiter;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::telemetry;
use crate::{Result, StagingError};

/// Window configuration for a [`RateLimiter`].
///
/// ```rust
/// # use wowstage::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new(36_000, Duration::from_secs(3600));
/// assert_eq!(config.max_requests, 36_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window. Default: 100 (Blizzard's per-second cap).
    pub max_requests: u32,
    /// Window length. Default: 1s.
    #[serde(rename = "time_window_secs", with = "secs")]
    pub time_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            time_window: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, time_window: Duration) -> Self {
        Self {
            max_requests,
            time_window,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Read-only snapshot of a limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub current_requests: u32,
    pub max_requests: u32,
    pub time_window: Duration,
    pub is_limited: bool,
    pub available_requests: u32,
    /// Time until the limited state clears, if currently limited.
    pub reset_in: Option<Duration>,
}

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    limited_until: Option<Instant>,
}

/// Sliding-window rate limiter.
///
/// Thread-safe. The prune, check and append steps of an admission run under
/// one lock, which is never held across an `.await`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
    label: String,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::labelled("global", config)
    }

    pub(crate) fn labelled(label: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
            label: label.into(),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // Poisoning is ignored: the window only holds timestamps.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `weight` request units or fail with
    /// [`StagingError::RateLimited`].
    ///
    /// Weights larger than `max_requests` can never be admitted and fail
    /// with [`StagingError::WeightExceedsCapacity`].
    pub fn acquire(&self, weight: u32) -> Result<()> {
        if weight > self.config.max_requests {
            return Err(StagingError::WeightExceedsCapacity {
                weight,
                max_requests: self.config.max_requests,
            });
        }

        let now = Instant::now();
        let mut window = self.lock();

        if let Some(until) = window.limited_until {
            if now < until {
                return Err(self.rejected(until - now));
            }
            window.limited_until = None;
        }

        let time_window = self.config.time_window;
        while window
            .requests
            .front()
            .is_some_and(|&t| now.duration_since(t) >= time_window)
        {
            window.requests.pop_front();
        }

        let current = window.requests.len();
        let max = self.config.max_requests as usize;
        if current + weight as usize > max {
            // Enough of the oldest entries must leave for `weight` to fit.
            let must_expire = current + weight as usize - max;
            let retry_after = window
                .requests
                .get(must_expire - 1)
                .map(|&t| (t + time_window).saturating_duration_since(now))
                .unwrap_or(time_window);
            window.limited_until = Some(now + retry_after);
            return Err(self.rejected(retry_after));
        }

        window
            .requests
            .extend(std::iter::repeat_n(now, weight as usize));
        Ok(())
    }

    fn rejected(&self, retry_after: Duration) -> StagingError {
        metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "key" => self.label.clone())
            .increment(1);
        StagingError::RateLimited { retry_after }
    }

    /// Wait until `weight` units are admitted.
    ///
    /// Sleeps for the reported `retry_after` between attempts. Only the
    /// calling task is suspended. Capacity errors are returned immediately.
    pub async fn wait_if_needed(&self, weight: u32) -> Result<()> {
        loop {
            match self.acquire(weight) {
                Ok(()) => return Ok(()),
                Err(StagingError::RateLimited { retry_after }) => {
                    warn!(
                        limiter = %self.label,
                        wait_ms = retry_after.as_millis() as u64,
                        "rate limited, waiting"
                    );
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Snapshot of the current window. Does not prune or otherwise mutate.
    pub fn get_status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let window = self.lock();
        let current = window
            .requests
            .iter()
            .filter(|&&t| now.duration_since(t) < self.config.time_window)
            .count() as u32;
        let reset_in = window
            .limited_until
            .filter(|&until| until > now)
            .map(|until| until - now);
        RateLimitStatus {
            current_requests: current,
            max_requests: self.config.max_requests,
            time_window: self.config.time_window,
            is_limited: reset_in.is_some(),
            available_requests: self.config.max_requests.saturating_sub(current),
            reset_in,
        }
    }

    /// Forget all tracked requests and any limited state.
    pub fn reset(&self) {
        let mut window = self.lock();
        window.requests.clear();
        window.limited_until = None;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
