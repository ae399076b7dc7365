//! Upstream game-data API boundary.
//!
//! [`UpstreamClient`] exposes one operation per kind of data the staging
//! chain can fetch. Implementations:
//!
//! - [`BlizzardClient`]: the Battle.net Game Data API over reqwest.
//! - [`RetryingUpstream`]: decorator retrying transient errors.
//! - [`RateLimitedUpstream`]: decorator admitting each call through a
//!   [`MultiKeyRateLimiter`](crate::MultiKeyRateLimiter).
//!
//! Decorators compose explicitly at build time:
//!
//! ```text
//! RetryingUpstream ─► RateLimitedUpstream ─► BlizzardClient
//! ```
//!
//! so every retry attempt is admitted by the limiter.

mod blizzard;
mod limited;
mod retry;

pub use blizzard::{BlizzardClient, BlizzardCredentials, DEFAULT_LOCALE, DEFAULT_OAUTH_URL};
pub use limited::RateLimitedUpstream;
pub use retry::{RetryConfig, RetryingUpstream};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{GameVersion, Region};

/// Errors raised at the upstream boundary.
///
/// Kept distinct from [`StagingError`](crate::StagingError) so the live tier
/// can tell upstream failures apart from its own.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Decode(String),

    /// Refused before reaching the network, e.g. a request heavier than the
    /// limiter window. Waiting does not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl UpstreamError {
    /// Whether the same call may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Http(_)
            | UpstreamError::RateLimited { .. }
            | UpstreamError::Timeout(_) => true,
            UpstreamError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for upstream calls.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// Blizzard namespace family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Frequently changing data: realms, auctions, token.
    Dynamic,
    /// Game data that only changes with patches: items, spells.
    Static,
    /// Player data: guilds, characters.
    Profile,
}

impl NamespaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceKind::Dynamic => "dynamic",
            NamespaceKind::Static => "static",
            NamespaceKind::Profile => "profile",
        }
    }
}

/// A Battle.net API namespace, e.g. `dynamic-classic-us` or `profile-eu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub kind: NamespaceKind,
    pub region: Region,
    pub game_version: GameVersion,
}

impl Namespace {
    pub fn new(kind: NamespaceKind, region: Region, game_version: GameVersion) -> Self {
        Self {
            kind,
            region,
            game_version,
        }
    }

    pub fn dynamic(region: Region, game_version: GameVersion) -> Self {
        Self::new(NamespaceKind::Dynamic, region, game_version)
    }

    pub fn static_data(region: Region, game_version: GameVersion) -> Self {
        Self::new(NamespaceKind::Static, region, game_version)
    }

    pub fn profile(region: Region, game_version: GameVersion) -> Self {
        Self::new(NamespaceKind::Profile, region, game_version)
    }

    /// Same region and version, different family.
    pub fn with_kind(self, kind: NamespaceKind) -> Self {
        Self { kind, ..self }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.game_version {
            GameVersion::Classic => write!(f, "{}-classic-{}", self.kind.as_str(), self.region),
            GameVersion::Retail => write!(f, "{}-{}", self.kind.as_str(), self.region),
        }
    }
}

/// Per-data-type fetch operations against the game-data API.
///
/// Every call names its [`Namespace`], which also carries the region.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Client name for logging and metrics.
    fn name(&self) -> &str;

    /// Realm index for the namespace's region.
    async fn realm_index(&self, ns: &Namespace) -> UpstreamResult<Value>;

    /// One realm, including its `connected_realm.href`.
    async fn realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value>;

    /// Find a realm by name when the direct lookup misses. Classic realm
    /// slugs are not always addressable directly.
    async fn search_realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        let _ = ns;
        Err(UpstreamError::NotFound(format!("realm {slug}")))
    }

    /// Current WoW Token price.
    async fn token(&self, ns: &Namespace) -> UpstreamResult<Value>;

    /// Guild profile. `name` is the display name; implementations slug it.
    async fn guild(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value>;

    async fn guild_roster(&self, ns: &Namespace, realm: &str, name: &str)
    -> UpstreamResult<Value>;

    async fn guild_achievements(
        &self,
        ns: &Namespace,
        realm: &str,
        name: &str,
    ) -> UpstreamResult<Value>;

    /// Auction house listings of a connected realm.
    async fn auctions(&self, ns: &Namespace, connected_realm_id: u64) -> UpstreamResult<Value>;

    /// Character profile summary.
    async fn character(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value>;
}
