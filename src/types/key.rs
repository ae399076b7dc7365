//! Structured request keys: data types, regions, game versions and targets.
//!
//! Keys are never parsed back out of their string form. The rendered cache
//! key (`stormrage:testguild`) exists only for storage and logging.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, StagingError};

/// Category of game data, each with its own TTL and upstream resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Auction,
    Guild,
    Realm,
    Character,
    Token,
}

impl DataType {
    /// Every data type, in declaration order.
    pub const ALL: [DataType; 5] = [
        DataType::Auction,
        DataType::Guild,
        DataType::Realm,
        DataType::Character,
        DataType::Token,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Auction => "auction",
            DataType::Guild => "guild",
            DataType::Realm => "realm",
            DataType::Character => "character",
            DataType::Token => "token",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auction" => Ok(DataType::Auction),
            "guild" => Ok(DataType::Guild),
            "realm" => Ok(DataType::Realm),
            "character" => Ok(DataType::Character),
            "token" => Ok(DataType::Token),
            _ => Err(StagingError::UnsupportedDataType(s.to_string())),
        }
    }
}

/// Battle.net API region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
    Kr,
    Tw,
    Cn,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::Kr => "kr",
            Region::Tw => "tw",
            Region::Cn => "cn",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "eu" => Ok(Region::Eu),
            "kr" => Ok(Region::Kr),
            "tw" => Ok(Region::Tw),
            "cn" => Ok(Region::Cn),
            _ => Err(StagingError::InvalidInput(format!("unknown region '{s}'"))),
        }
    }
}

/// Game flavour. Classic and retail live in separate API namespaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVersion {
    Retail,
    #[default]
    Classic,
}

impl GameVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameVersion::Retail => "retail",
            GameVersion::Classic => "classic",
        }
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameVersion {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retail" => Ok(GameVersion::Retail),
            "classic" => Ok(GameVersion::Classic),
            _ => Err(StagingError::InvalidInput(format!(
                "unknown game version '{s}'"
            ))),
        }
    }
}

/// Cache key of [`Target::RealmIndex`].
const REALM_INDEX_KEY: &str = "index";

/// A validated realm slug (`stormrage`, `area-52`).
///
/// Slugs are lowercased with spaces folded to `-`. A slug never contains
/// `:` or `/` and is never `index`, which keeps rendered cache keys
/// unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RealmSlug(String);

impl RealmSlug {
    pub fn new(raw: &str) -> Result<Self> {
        let slug = raw.trim().to_lowercase().replace(' ', "-");
        if slug.is_empty() {
            return Err(StagingError::InvalidKey("realm slug is empty".to_string()));
        }
        if slug.contains(':') || slug.contains('/') {
            return Err(StagingError::InvalidKey(format!(
                "realm slug '{raw}' contains a reserved character"
            )));
        }
        if slug == REALM_INDEX_KEY {
            return Err(StagingError::InvalidKey(format!(
                "'{raw}' is reserved for the realm index"
            )));
        }
        Ok(Self(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RealmSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RealmSlug {
    type Error = StagingError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<RealmSlug> for String {
    fn from(slug: RealmSlug) -> Self {
        slug.0
    }
}

/// What a read is about. The data type follows from the variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// The realm index for a region.
    RealmIndex,
    Realm { slug: RealmSlug },
    /// Current WoW Token price.
    Token,
    Guild { realm: RealmSlug, name: String },
    /// Auction house of the connected realm that `realm` belongs to.
    Auction { realm: RealmSlug },
    Character { realm: RealmSlug, name: String },
}

impl Target {
    pub fn realm(slug: &str) -> Result<Self> {
        Ok(Target::Realm {
            slug: RealmSlug::new(slug)?,
        })
    }

    pub fn guild(realm: &str, name: &str) -> Result<Self> {
        Ok(Target::Guild {
            realm: RealmSlug::new(realm)?,
            name: non_empty("guild name", name)?,
        })
    }

    pub fn auction(realm: &str) -> Result<Self> {
        Ok(Target::Auction {
            realm: RealmSlug::new(realm)?,
        })
    }

    pub fn character(realm: &str, name: &str) -> Result<Self> {
        Ok(Target::Character {
            realm: RealmSlug::new(realm)?,
            name: non_empty("character name", name)?,
        })
    }

    /// Build a target from loosely-typed input (CLI arguments, seed lists).
    ///
    /// `name` is the subject (realm slug for realm/auction, guild or
    /// character name otherwise); `realm` is required for guild and
    /// character targets. Missing parts fail fast.
    pub fn from_parts(data_type: DataType, name: Option<&str>, realm: Option<&str>) -> Result<Self> {
        match data_type {
            DataType::Token => Ok(Target::Token),
            DataType::Realm => match name.map(str::trim) {
                None => Ok(Target::RealmIndex),
                Some(slug) if slug.eq_ignore_ascii_case(REALM_INDEX_KEY) => Ok(Target::RealmIndex),
                Some(slug) => Target::realm(slug),
            },
            DataType::Auction => match name.or(realm) {
                Some(slug) => Target::auction(slug),
                None => Err(StagingError::InvalidKey(
                    "auction lookups need a realm".to_string(),
                )),
            },
            DataType::Guild | DataType::Character => {
                let name = name.ok_or_else(|| {
                    StagingError::InvalidKey(format!("{data_type} lookups need a name"))
                })?;
                let realm = realm.ok_or_else(|| {
                    StagingError::InvalidKey(format!("{data_type} lookups need a realm"))
                })?;
                if data_type == DataType::Guild {
                    Target::guild(realm, name)
                } else {
                    Target::character(realm, name)
                }
            }
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Target::RealmIndex | Target::Realm { .. } => DataType::Realm,
            Target::Token => DataType::Token,
            Target::Guild { .. } => DataType::Guild,
            Target::Auction { .. } => DataType::Auction,
            Target::Character { .. } => DataType::Character,
        }
    }

    /// Rendered, lowercase cache key for this target.
    pub fn cache_key(&self) -> String {
        match self {
            Target::RealmIndex => REALM_INDEX_KEY.to_string(),
            Target::Realm { slug } => slug.to_string(),
            Target::Token => "current".to_string(),
            Target::Guild { realm, name } | Target::Character { realm, name } => {
                format!("{realm}:{}", name.trim().to_lowercase())
            }
            Target::Auction { realm } => realm.to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data_type(), self.cache_key())
    }
}

fn non_empty(what: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StagingError::InvalidKey(format!("{what} is empty")));
    }
    Ok(trimmed.to_string())
}

/// Identity of a cached row: `(data_type, cache_key, region, game_version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub data_type: DataType,
    pub cache_key: String,
    pub region: Region,
    pub game_version: GameVersion,
}

impl RecordKey {
    pub fn new(target: &Target, region: Region, game_version: GameVersion) -> Self {
        Self {
            data_type: target.data_type(),
            cache_key: target.cache_key(),
            region,
            game_version,
        }
    }

    /// Fast-cache key: `{data_type}:{region}:{cache_key}:{game_version}`.
    pub fn fast_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.data_type, self.region, self.cache_key, self.game_version
        )
        .to_lowercase()
    }
}
