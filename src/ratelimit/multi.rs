//! Keyed registry of independent rate limiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::Result;

/// One [`RateLimiter`] per key, created on first use.
///
/// A key's limiter is built from, in order of precedence: the config passed
/// to [`acquire_with`](Self::acquire_with), a per-key override registered
/// with [`with_override`](Self::with_override), or the default config.
///
/// The registry lock covers only lookup-or-create; admission runs on the
/// per-key limiter after the registry lock is released.
#[derive(Debug)]
pub struct MultiKeyRateLimiter {
    default_config: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl MultiKeyRateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Use `config` for `key` instead of the default.
    pub fn with_override(mut self, key: impl Into<String>, config: RateLimitConfig) -> Self {
        self.overrides.insert(key.into(), config);
        self
    }

    pub fn default_config(&self) -> RateLimitConfig {
        self.default_config
    }

    fn limiter(&self, key: &str, config: Option<RateLimitConfig>) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = limiters.get(key) {
            return Arc::clone(existing);
        }
        let config = config
            .or_else(|| self.overrides.get(key).copied())
            .unwrap_or(self.default_config);
        let limiter = Arc::new(RateLimiter::labelled(key, config));
        limiters.insert(key.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Admit `weight` units against `key`'s limiter.
    pub fn acquire(&self, key: &str, weight: u32) -> Result<()> {
        self.limiter(key, None).acquire(weight)
    }

    /// Like [`acquire`](Self::acquire), creating the key's limiter from
    /// `config` if it does not exist yet.
    pub fn acquire_with(&self, key: &str, weight: u32, config: RateLimitConfig) -> Result<()> {
        self.limiter(key, Some(config)).acquire(weight)
    }

    /// Wait until `weight` units are admitted against `key`.
    pub async fn wait_if_needed(&self, key: &str, weight: u32) -> Result<()> {
        let limiter = self.limiter(key, None);
        limiter.wait_if_needed(weight).await
    }

    /// Status of `key`'s limiter, if one has been created.
    pub fn status(&self, key: &str) -> Option<RateLimitStatus> {
        let limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        limiters.get(key).map(|l| l.get_status())
    }

    /// Keys with a live limiter, sorted.
    pub fn keys(&self) -> Vec<String> {
        let limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = limiters.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Reset every limiter without dropping them.
    pub fn reset_all(&self) {
        let limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        for limiter in limiters.values() {
            limiter.reset();
        }
    }
}

impl Default for MultiKeyRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
