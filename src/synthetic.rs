//! Placeholder data for reads no real tier could answer.
//!
//! Each data type has one [`Placeholder`] variant that knows its own shape.
//! Output is deterministic apart from the generation timestamp, and is
//! always tagged synthetic so callers can tell it from real data.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::types::{DataType, StagedPayload, Target};

/// Item listed in synthetic auction data.
pub const PLACEHOLDER_ITEM_ID: u64 = 171_276;
/// Buyout of each synthetic listing, in copper (150g).
pub const PLACEHOLDER_BUYOUT: u64 = 1_500_000;
/// Synthetic WoW Token price, in copper (250g).
pub const PLACEHOLDER_TOKEN_PRICE: u64 = 2_500_000;

const AUCTION_LISTINGS: usize = 5000;
const GUILD_MEMBERS: usize = 20;
const GUILD_OFFICERS: usize = 5;
const GUILD_MEMBER_COUNT: u64 = 125;
const GUILD_ACHIEVEMENT_POINTS: u64 = 15_420;
const BASE_ITEM_LEVEL: u64 = 580;

/// Placeholder shape for one data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Auction { realm: String, listings: usize },
    Guild { realm: String, name: String, members: usize },
    /// `slug: None` is the realm index.
    Realm { slug: Option<String> },
    Token,
    Character { realm: String, name: String },
}

impl Placeholder {
    pub fn for_target(target: &Target) -> Self {
        match target {
            Target::Auction { realm } => Placeholder::Auction {
                realm: realm.to_string(),
                listings: AUCTION_LISTINGS,
            },
            Target::Guild { realm, name } => Placeholder::Guild {
                realm: realm.to_string(),
                name: name.clone(),
                members: GUILD_MEMBERS,
            },
            Target::RealmIndex => Placeholder::Realm { slug: None },
            Target::Realm { slug } => Placeholder::Realm {
                slug: Some(slug.to_string()),
            },
            Target::Token => Placeholder::Token,
            Target::Character { realm, name } => Placeholder::Character {
                realm: realm.to_string(),
                name: name.clone(),
            },
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Placeholder::Auction { .. } => DataType::Auction,
            Placeholder::Guild { .. } => DataType::Guild,
            Placeholder::Realm { .. } => DataType::Realm,
            Placeholder::Token => DataType::Token,
            Placeholder::Character { .. } => DataType::Character,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Placeholder::Auction { .. } => "Example auction data - live API unavailable",
            Placeholder::Guild { .. } => "Example guild data - live API unavailable",
            Placeholder::Realm { .. } => "Example realm data - live API unavailable",
            Placeholder::Token => "Example token price - live API unavailable",
            Placeholder::Character { .. } => "Example character data - live API unavailable",
        }
    }

    pub fn render(&self, now: DateTime<Utc>) -> Value {
        match self {
            Placeholder::Auction { listings, .. } => {
                let auctions: Vec<Value> = (0..*listings)
                    .map(|i| {
                        json!({
                            "id": 12_345 + i as u64,
                            "item": { "id": PLACEHOLDER_ITEM_ID },
                            "buyout": PLACEHOLDER_BUYOUT,
                            "quantity": 1,
                            "time_left": "LONG",
                        })
                    })
                    .collect();
                json!({ "auctions": auctions })
            }
            Placeholder::Guild {
                realm,
                name,
                members,
            } => {
                let members_data: Vec<Value> = (0..*members)
                    .map(|i| {
                        json!({
                            "name": format!("Player{i}"),
                            "realm": { "slug": realm },
                            "level": 80,
                            "character_class": { "name": "Warrior" },
                            "guild_rank": if i < GUILD_OFFICERS { 1 } else { 2 },
                            "equipment_summary": {
                                "average_item_level": BASE_ITEM_LEVEL + (i % 20) as u64,
                            },
                        })
                    })
                    .collect();
                json!({
                    "guild_info": {
                        "name": name,
                        "realm": { "slug": realm },
                        "member_count": GUILD_MEMBER_COUNT,
                        "achievement_points": GUILD_ACHIEVEMENT_POINTS,
                    },
                    "members_data": members_data,
                })
            }
            Placeholder::Realm { slug: None } => json!({ "realms": [] }),
            Placeholder::Realm { slug: Some(slug) } => json!({
                "name": display_name(slug),
                "slug": slug,
                "population": { "name": "High" },
                "type": { "name": "Normal" },
                "timezone": "America/New_York",
            }),
            Placeholder::Token => json!({
                "price": PLACEHOLDER_TOKEN_PRICE,
                "last_updated_timestamp": now.timestamp_millis(),
            }),
            Placeholder::Character { realm, name } => json!({
                "name": name,
                "realm": { "slug": realm },
                "level": 80,
                "character_class": { "name": "Warrior" },
                "equipped_item_level": BASE_ITEM_LEVEL,
            }),
        }
    }
}

/// `area-52` → `Area 52`.
fn display_name(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The last tier of the staging chain. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticGenerator;

impl SyntheticGenerator {
    pub fn generate(&self, target: &Target, now: DateTime<Utc>) -> StagedPayload {
        let placeholder = Placeholder::for_target(target);
        StagedPayload::synthetic(placeholder.render(now), now, placeholder.message())
    }
}
