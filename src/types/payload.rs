//! Read requests and the payloads the staging chain returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::{GameVersion, Region, Target};

/// A read through the staging chain.
///
/// ```rust
/// # use wowstage::{DataRequest, Region, Target};
/// let request = DataRequest::new(Target::Token)
///     .region(Region::Eu)
///     .force_refresh(true);
/// assert!(request.force_refresh);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub target: Target,
    pub region: Region,
    /// Overrides the service's configured game version when set.
    pub game_version: Option<GameVersion>,
    /// Skip both cache tiers and go straight to upstream.
    pub force_refresh: bool,
}

impl DataRequest {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            region: Region::default(),
            game_version: None,
            force_refresh: false,
        }
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn game_version(mut self, version: GameVersion) -> Self {
        self.game_version = Some(version);
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// The tier that answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    FastCache,
    PersistentCache,
    Live,
    Synthetic,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::FastCache => "fast_cache",
            Tier::PersistentCache => "persistent_cache",
            Tier::Live => "live",
            Tier::Synthetic => "synthetic",
        }
    }
}

/// Result of a staged read. Always present; provenance is carried in
/// [`tier`](Self::tier) rather than in an error.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedPayload {
    pub data: serde_json::Value,
    pub tier: Tier,
    /// When the underlying data was captured from upstream (or generated).
    pub captured_at: Option<DateTime<Utc>>,
    /// Age of cached data at read time, in hours.
    pub age_hours: Option<f64>,
    pub message: Option<String>,
}

impl StagedPayload {
    pub(crate) fn cached(
        data: serde_json::Value,
        tier: Tier,
        captured_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let age_hours = (now - captured_at).num_milliseconds() as f64 / 3_600_000.0;
        Self {
            data,
            tier,
            captured_at: Some(captured_at),
            age_hours: Some(age_hours.max(0.0)),
            message: None,
        }
    }

    pub(crate) fn live(data: serde_json::Value, captured_at: DateTime<Utc>) -> Self {
        Self {
            data,
            tier: Tier::Live,
            captured_at: Some(captured_at),
            age_hours: None,
            message: None,
        }
    }

    pub(crate) fn synthetic(
        data: serde_json::Value,
        generated_at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            data,
            tier: Tier::Synthetic,
            captured_at: Some(generated_at),
            age_hours: None,
            message: Some(message.into()),
        }
    }

    /// Placeholder data produced because no real data was reachable.
    pub fn is_synthetic(&self) -> bool {
        self.tier == Tier::Synthetic
    }

    /// Served by one of the cache tiers.
    pub fn from_cache(&self) -> bool {
        matches!(self.tier, Tier::FastCache | Tier::PersistentCache)
    }
}

#[derive(Serialize)]
struct WirePayload<'a> {
    data: &'a serde_json::Value,
    source: Tier,
    synthetic: bool,
    from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    captured_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl Serialize for StagedPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WirePayload {
            data: &self.data,
            source: self.tier,
            synthetic: self.is_synthetic(),
            from_cache: self.from_cache(),
            captured_at: self.captured_at,
            age_hours: self.age_hours,
            message: self.message.as_deref(),
        }
        .serialize(serializer)
    }
}
