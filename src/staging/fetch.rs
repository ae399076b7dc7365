//! Live tier: resolve a [`Target`] to upstream calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::types::{CollectionStatus, GameVersion, Region, Target};
use crate::upstream::{Namespace, UpstreamClient, UpstreamError, UpstreamResult};

/// Member profiles fetched per guild.
const MAX_GUILD_MEMBERS: usize = 50;
/// Member profile failures tolerated before the rest of the roster is skipped.
const MAX_MEMBER_ERRORS: u32 = 10;

/// A successful live fetch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fetched {
    pub data: Value,
    pub records: u64,
    pub status: CollectionStatus,
}

impl Fetched {
    fn single(data: Value) -> Self {
        Self {
            data,
            records: 1,
            status: CollectionStatus::Success,
        }
    }
}

pub(crate) struct LiveFetcher {
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
}

impl LiveFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Fetch `target`. Each upstream call is bounded by the configured
    /// timeout; a composite such as a guild makes many calls.
    pub async fn fetch(
        &self,
        target: &Target,
        region: Region,
        game_version: GameVersion,
    ) -> UpstreamResult<Fetched> {
        let dynamic = Namespace::dynamic(region, game_version);
        let profile = Namespace::profile(region, game_version);

        match target {
            Target::RealmIndex => self
                .bounded(self.client.realm_index(&dynamic))
                .await
                .map(Fetched::single),
            Target::Realm { slug } => self.realm(&dynamic, slug.as_str()).await.map(Fetched::single),
            Target::Token => self
                .bounded(self.client.token(&dynamic))
                .await
                .map(Fetched::single),
            Target::Auction { realm } => {
                let realm_data = self.realm(&dynamic, realm.as_str()).await?;
                let connected_realm = connected_realm_id(&realm_data)?;
                let data = self
                    .bounded(self.client.auctions(&dynamic, connected_realm))
                    .await?;
                let records = data
                    .get("auctions")
                    .and_then(Value::as_array)
                    .map_or(0, |a| a.len() as u64);
                Ok(Fetched {
                    data,
                    records,
                    status: CollectionStatus::Success,
                })
            }
            Target::Guild { realm, name } => self.guild(&profile, realm.as_str(), name).await,
            Target::Character { realm, name } => self
                .bounded(self.client.character(&profile, realm.as_str(), name))
                .await
                .map(Fetched::single),
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = UpstreamResult<T>>) -> UpstreamResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(UpstreamError::Timeout(self.timeout)))
    }

    /// Direct realm lookup, falling back to a name search for classic.
    async fn realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        match self.bounded(self.client.realm(ns, slug)).await {
            Err(UpstreamError::NotFound(_)) if ns.game_version == GameVersion::Classic => {
                debug!(realm = slug, "direct realm lookup missed, searching");
                self.bounded(self.client.search_realm(ns, slug)).await
            }
            other => other,
        }
    }

    /// Guild profile, roster, achievements and up to 50 member summaries.
    async fn guild(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Fetched> {
        let guild_info = self.bounded(self.client.guild(ns, realm, name)).await?;
        let guild_roster = self
            .bounded(self.client.guild_roster(ns, realm, name))
            .await?;
        let guild_achievements = match self
            .bounded(self.client.guild_achievements(ns, realm, name))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                debug!(realm, guild = name, error = %e, "guild achievements unavailable");
                json!({})
            }
        };

        let members = guild_roster
            .get("members")
            .and_then(Value::as_array)
            .map(|m| &m[..m.len().min(MAX_GUILD_MEMBERS)])
            .unwrap_or(&[]);

        let mut members_data = Vec::with_capacity(members.len());
        let mut member_errors = 0u32;
        for member in members {
            if member_errors >= MAX_MEMBER_ERRORS {
                warn!(realm, guild = name, member_errors, "stopping member fetch");
                break;
            }
            let Some(mut summary) = member_summary(member, realm) else {
                continue;
            };
            let member_realm = summary["realm"]["slug"].as_str().unwrap_or(realm).to_string();
            let member_name = summary["name"].as_str().unwrap_or_default().to_string();

            match self
                .bounded(self.client.character(ns, &member_realm, &member_name))
                .await
            {
                Ok(profile) => merge_profile(&mut summary, &profile),
                Err(e) => {
                    debug!(character = %member_name, error = %e, "member profile unavailable");
                    member_errors += 1;
                }
            }
            members_data.push(summary);
        }

        let records = members_data.len() as u64;
        let status = if member_errors > 0 {
            CollectionStatus::Partial
        } else {
            CollectionStatus::Success
        };
        Ok(Fetched {
            data: json!({
                "guild_info": guild_info,
                "guild_roster": guild_roster,
                "guild_achievements": guild_achievements,
                "members_data": members_data,
                "member_errors": member_errors,
                "fetch_timestamp": Utc::now().to_rfc3339(),
            }),
            records,
            status,
        })
    }
}

/// Roster entry → member summary. Entries without a character name are skipped.
fn member_summary(member: &Value, guild_realm: &str) -> Option<Value> {
    let character = member.get("character")?;
    let name = character.get("name")?.as_str()?;
    let realm = character
        .pointer("/realm/slug")
        .and_then(Value::as_str)
        .unwrap_or(guild_realm);
    let field = |k: &str| character.get(k).cloned().unwrap_or_else(|| json!({}));

    Some(json!({
        "name": name,
        "realm": { "slug": realm },
        "guild_rank": member.get("rank").cloned().unwrap_or(json!(0)),
        "level": character.get("level").cloned().unwrap_or(json!(0)),
        "character_class": field("character_class"),
        "playable_class": field("playable_class"),
        "playable_race": field("playable_race"),
        "equipment_summary": { "average_item_level": 0, "total_items": 0 },
    }))
}

fn merge_profile(summary: &mut Value, profile: &Value) {
    if let Some(ilvl) = profile.get("equipped_item_level") {
        summary["equipped_item_level"] = ilvl.clone();
        summary["equipment_summary"]["average_item_level"] = ilvl.clone();
    }
    for field in ["achievement_points", "last_login_timestamp", "active_spec"] {
        if let Some(v) = profile.get(field) {
            summary[field] = v.clone();
        }
    }
}

/// Connected realm id from a realm payload's `connected_realm.href`, e.g.
/// `https://us.api.blizzard.com/data/wow/connected-realm/4372?namespace=dynamic-us`.
pub(crate) fn connected_realm_id(realm: &Value) -> UpstreamResult<u64> {
    let href = realm
        .pointer("/connected_realm/href")
        .and_then(Value::as_str)
        .ok_or_else(|| UpstreamError::Decode("realm has no connected_realm.href".to_string()))?;
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| UpstreamError::Decode(format!("bad connected realm href '{href}'")))
}
