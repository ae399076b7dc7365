//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag; must exist)
//! 2. `~/.wowstage/config.toml` (user)
//! 3. `/etc/wowstage/config.toml` (system)
//! 4. built-in defaults
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.wowstage/secrets.toml` (user, must be 0600)
//! 2. `/etc/wowstage/secrets.toml` (system, must be 0600)
//!
//! Blizzard credentials missing from the secrets file are read from
//! `BLIZZARD_CLIENT_ID` / `BLIZZARD_CLIENT_SECRET`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::cache::{FastCacheConfig, MemoryFastCache, TtlPolicy};
use crate::ratelimit::{MultiKeyRateLimiter, RateLimitConfig};
use crate::staging::{StagingConfig, StagingServiceBuilder};
use crate::store::SqliteStore;
use crate::types::{GameVersion, Region};
use crate::upstream::{BlizzardClient, BlizzardCredentials, DEFAULT_LOCALE, RetryConfig};
use crate::{Result, StagingError};

const CLIENT_ID_ENV: &str = "BLIZZARD_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "BLIZZARD_CLIENT_SECRET";

/// File configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub staging: StagingSection,
    #[serde(default)]
    pub ttl: TtlPolicy,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fast_cache: FastCacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub blizzard: BlizzardConfig,
}

/// `[staging]`: orchestrator behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingSection {
    pub game_version: GameVersion,
    pub default_region: Region,
    pub default_realm: String,
    pub upstream_timeout_secs: u64,
    pub seed_delay_ms: u64,
    pub single_flight: bool,
}

impl Default for StagingSection {
    fn default() -> Self {
        let defaults = StagingConfig::default();
        Self {
            game_version: defaults.game_version,
            default_region: Region::default(),
            default_realm: defaults.default_realm,
            upstream_timeout_secs: defaults.upstream_timeout.as_secs(),
            seed_delay_ms: defaults.seed_delay.as_millis() as u64,
            single_flight: defaults.single_flight,
        }
    }
}

/// `[rate_limit]`: default window plus per-key overrides under
/// `[rate_limit.keys.<key>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_requests: u32,
    pub time_window_secs: f64,
    pub keys: BTreeMap<String, RateLimitConfig>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            max_requests: defaults.max_requests,
            time_window_secs: defaults.time_window.as_secs_f64(),
            keys: BTreeMap::new(),
        }
    }
}

impl RateLimitSection {
    pub fn limiter(&self) -> Result<MultiKeyRateLimiter> {
        let window = Duration::try_from_secs_f64(self.time_window_secs).map_err(|e| {
            StagingError::Configuration(format!("invalid rate_limit.time_window_secs: {e}"))
        })?;
        let default = RateLimitConfig::new(self.max_requests, window);
        validate_limit("rate_limit", &default)?;

        let mut limiter = MultiKeyRateLimiter::new(default);
        for (key, config) in &self.keys {
            validate_limit(&format!("rate_limit.keys.{key}"), config)?;
            limiter = limiter.with_override(key.clone(), *config);
        }
        Ok(limiter)
    }
}

fn validate_limit(section: &str, config: &RateLimitConfig) -> Result<()> {
    if config.max_requests == 0 || config.time_window.is_zero() {
        return Err(StagingError::Configuration(format!(
            "{section}: max_requests and time_window_secs must be positive"
        )));
    }
    Ok(())
}

/// `[store]`: persistent tier location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file (default: `<data dir>/wowstage/cache.db`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Configured path, else the platform data directory. `None` when
    /// neither is available; the service then keeps data in memory.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("wowstage").join("cache.db")))
    }
}

/// `[blizzard]`: upstream endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlizzardConfig {
    pub locale: String,
    /// Fixed API base for every region (proxies, tests).
    pub base_url: Option<String>,
    pub oauth_url: Option<String>,
}

impl Default for BlizzardConfig {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            base_url: None,
            oauth_url: None,
        }
    }
}

/// Secrets file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub blizzard: Option<BlizzardCredentials>,
}

impl Config {
    /// Load configuration from the standard locations, falling back to
    /// defaults when no file exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StagingError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            StagingError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Check values serde cannot: TTL ranges and limiter windows.
    pub fn validate(&self) -> Result<()> {
        self.ttl.validate()?;
        self.rate_limit.limiter().map(|_| ())
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(StagingError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".wowstage").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/wowstage/config.toml");
        Ok(system_config.exists().then_some(system_config))
    }

    pub fn staging_config(&self) -> StagingConfig {
        StagingConfig {
            game_version: self.staging.game_version,
            ttl: self.ttl,
            upstream_timeout: Duration::from_secs(self.staging.upstream_timeout_secs),
            seed_delay: Duration::from_millis(self.staging.seed_delay_ms),
            single_flight: self.staging.single_flight,
            default_realm: self.staging.default_realm.clone(),
        }
    }

    /// Blizzard client for `credentials`, honouring `[blizzard]` overrides.
    pub fn blizzard_client(&self, credentials: BlizzardCredentials) -> Result<BlizzardClient> {
        let mut client = match &self.blizzard.base_url {
            Some(base) => BlizzardClient::with_base_url(credentials, base.clone())?,
            None => BlizzardClient::new(credentials)?,
        };
        if let Some(url) = &self.blizzard.oauth_url {
            client = client.oauth_url(url.clone());
        }
        Ok(client.locale(self.blizzard.locale.clone()))
    }

    /// A service builder with every configured tier attached. Without
    /// credentials the live tier is left out.
    pub fn service_builder(&self, secrets: &Secrets) -> Result<StagingServiceBuilder> {
        self.ttl.validate()?;
        let mut builder = StagingServiceBuilder::new()
            .config(self.staging_config())
            .fast_cache(Arc::new(MemoryFastCache::new(&self.fast_cache)))
            .rate_limiter(Arc::new(self.rate_limit.limiter()?))
            .retry(self.retry.clone());

        if let Some(path) = self.store.resolved_path() {
            builder = builder.store(Arc::new(SqliteStore::open(path)?));
        }

        match secrets.blizzard_credentials() {
            Some(credentials) => {
                builder = builder.upstream(Arc::new(self.blizzard_client(credentials)?));
            }
            None => info!("no Blizzard credentials configured, live tier disabled"),
        }
        Ok(builder)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (credentials may come from
    /// the environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".wowstage").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/wowstage/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file, rejecting group- or world-readable files.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            StagingError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            StagingError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            StagingError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(StagingError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Credentials from the secrets file, else from the environment.
    pub fn blizzard_credentials(&self) -> Option<BlizzardCredentials> {
        self.blizzard.clone().or_else(|| {
            let id = std::env::var(CLIENT_ID_ENV).ok()?;
            let secret = std::env::var(CLIENT_SECRET_ENV).ok()?;
            Some(BlizzardCredentials::new(id, secret))
        })
    }
}
