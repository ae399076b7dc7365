//! Battle.net Game Data API client.
//!
//! Authenticates with the OAuth2 client-credentials flow and caches the
//! access token until shortly before it expires.
//! See: <https://develop.battle.net/documentation/world-of-warcraft>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Namespace, UpstreamClient, UpstreamError, UpstreamResult};
use crate::types::Region;
use crate::{Result, StagingError};

/// Battle.net OAuth token endpoint.
pub const DEFAULT_OAUTH_URL: &str = "https://oauth.battle.net/token";

/// Locale sent with every request.
pub const DEFAULT_LOCALE: &str = "en_US";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens are refreshed this long before Battle.net says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Fallback lifetime when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// OAuth client credentials issued by the Battle.net developer portal.
#[derive(Clone, Deserialize)]
pub struct BlizzardCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl BlizzardCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for BlizzardCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlizzardCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Client for the Battle.net Game Data and Profile APIs.
pub struct BlizzardClient {
    http: Client,
    credentials: BlizzardCredentials,
    /// Fixed API base; `None` derives it from the namespace region.
    base_url: Option<String>,
    oauth_url: String,
    locale: String,
    token: Mutex<Option<AccessToken>>,
}

impl BlizzardClient {
    pub fn new(credentials: BlizzardCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| StagingError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials,
            base_url: None,
            oauth_url: DEFAULT_OAUTH_URL.to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Use one base URL for every region, with the token endpoint at
    /// `{base_url}/token` (for testing with wiremock).
    pub fn with_base_url(credentials: BlizzardCredentials, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let mut client = Self::new(credentials)?;
        client.oauth_url = format!("{base_url}/token");
        client.base_url = Some(base_url);
        Ok(client)
    }

    pub fn oauth_url(mut self, url: impl Into<String>) -> Self {
        self.oauth_url = url.into();
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    fn region_base(&self, region: Region) -> String {
        match (&self.base_url, region) {
            (Some(base), _) => base.clone(),
            (None, Region::Cn) => "https://gateway.battlenet.com.cn".to_string(),
            (None, region) => format!("https://{region}.api.blizzard.com"),
        }
    }

    fn endpoint(&self, region: Region, segments: &[&str]) -> UpstreamResult<Url> {
        let base = self.region_base(region);
        let mut url =
            Url::parse(&base).map_err(|e| UpstreamError::Http(format!("bad base URL {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| UpstreamError::Http(format!("base URL {base} cannot take a path")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Cached access token, fetching a new one when missing, stale or
    /// `force`d.
    async fn access_token(&self, force: bool) -> UpstreamResult<String> {
        let mut slot = self.token.lock().await;
        if !force
            && let Some(token) = slot.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let response = self
            .http
            .post(&self.oauth_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Authentication(format!(
                "token request failed ({status}): {text}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(format!("token response: {e}")))?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        info!(expires_in_secs = lifetime.as_secs(), "obtained Battle.net access token");
        let value = body.access_token;
        *slot = Some(AccessToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(value)
    }

    async fn send(
        &self,
        url: &Url,
        ns: &Namespace,
        query: &[(&str, String)],
        token: &str,
    ) -> UpstreamResult<Response> {
        self.http
            .get(url.clone())
            .bearer_auth(token)
            .header("Accept", "application/json")
            .query(&[("namespace", ns.to_string()), ("locale", self.locale.clone())])
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(HTTP_TIMEOUT)
                } else {
                    UpstreamError::Http(e.to_string())
                }
            })
    }

    /// Authenticated GET; a 401/403 refreshes the token once and re-sends.
    /// Both extra requests run under the caller's single limiter admission.
    async fn get_json(
        &self,
        ns: &Namespace,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> UpstreamResult<Value> {
        let url = self.endpoint(ns.region, segments)?;
        debug!(url = %url, namespace = %ns, "Battle.net request");

        let token = self.access_token(false).await?;
        let mut response = self.send(&url, ns, query, &token).await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            warn!(url = %url, status = %response.status(), "refreshing access token");
            let token = self.access_token(true).await?;
            response = self.send(&url, ns, query, &token).await?;
        }
        decode(response, &url).await
    }
}

async fn decode(response: Response, url: &Url) -> UpstreamResult<Value> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(format!("{}: {e}", url.path())));
    }

    match status {
        StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(url.path().to_string())),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(url = %url, ?retry_after, "Battle.net rate limited");
            Err(UpstreamError::RateLimited { retry_after })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(UpstreamError::Authentication(format!("{status} for {}", url.path())))
        }
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Search hits carry the name either as a localised map or a plain string.
fn realm_matches(data: &Value, slug: &str) -> bool {
    if data.get("slug").and_then(Value::as_str) == Some(slug) {
        return true;
    }
    let name = match data.get("name") {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Object(map)) => map.get("en_US").and_then(Value::as_str).unwrap_or(""),
        _ => "",
    };
    !name.is_empty() && name.to_lowercase().replace(' ', "-") == slug
}

fn name_slug(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

#[async_trait]
impl UpstreamClient for BlizzardClient {
    fn name(&self) -> &str {
        "blizzard"
    }

    async fn realm_index(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.get_json(ns, &["data", "wow", "realm", "index"], &[])
            .await
    }

    async fn realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        self.get_json(ns, &["data", "wow", "realm", slug], &[])
            .await
    }

    async fn search_realm(&self, ns: &Namespace, slug: &str) -> UpstreamResult<Value> {
        info!(realm = slug, "searching realms by name");
        let results = self
            .get_json(
                ns,
                &["data", "wow", "search", "realm"],
                &[
                    ("name.en_US", slug.to_string()),
                    ("_pageSize", "100".to_string()),
                ],
            )
            .await?;

        results
            .get("results")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|r| r.get("data"))
            .find(|data| realm_matches(data, slug))
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("realm {slug}")))
    }

    async fn token(&self, ns: &Namespace) -> UpstreamResult<Value> {
        self.get_json(ns, &["data", "wow", "token", "index"], &[])
            .await
    }

    async fn guild(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        let slug = name_slug(name);
        self.get_json(ns, &["data", "wow", "guild", realm, &slug], &[])
            .await
    }

    async fn guild_roster(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        let slug = name_slug(name);
        self.get_json(ns, &["data", "wow", "guild", realm, &slug, "roster"], &[])
            .await
    }

    async fn guild_achievements(
        &self,
        ns: &Namespace,
        realm: &str,
        name: &str,
    ) -> UpstreamResult<Value> {
        let slug = name_slug(name);
        self.get_json(
            ns,
            &["data", "wow", "guild", realm, &slug, "achievements"],
            &[],
        )
        .await
    }

    async fn auctions(&self, ns: &Namespace, connected_realm_id: u64) -> UpstreamResult<Value> {
        let id = connected_realm_id.to_string();
        self.get_json(ns, &["data", "wow", "connected-realm", &id, "auctions"], &[])
            .await
    }

    async fn character(&self, ns: &Namespace, realm: &str, name: &str) -> UpstreamResult<Value> {
        let name = name.trim().to_lowercase();
        self.get_json(ns, &["profile", "wow", "character", realm, &name], &[])
            .await
    }
}
