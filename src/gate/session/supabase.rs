use async_trait::async_trait;
use axum_extra::extract::cookie::CookieJar;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use super::{AuthCookie, AuthUser, Resolution, ResolveError, SessionResolver};
use crate::gate::tracking::{ApiCallError, ApiType, CallMetadata, track_external_api_call};

const USER_ENDPOINT: &str = "/auth/v1/user";
const TOKEN_ENDPOINT: &str = "/auth/v1/token";

// Refresh slightly early so the access token cannot expire mid-request.
const EXPIRY_MARGIN_SECONDS: i64 = 30;

/// Session as stored in the auth cookie by the browser client.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<i64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl StoredSession {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + EXPIRY_MARGIN_SECONDS)
    }

    fn with_expiry(mut self, now: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|expires_in| now + expires_in);
        }
        self
    }
}

/// Resolves sessions with the GoTrue REST API of a Supabase project.
pub struct SupabaseResolver {
    client: Client,
    base_url: String,
    anon_key: SecretString,
    cookie: AuthCookie,
}

impl SupabaseResolver {
    #[must_use]
    pub fn new(client: Client, base_url: &str, anon_key: SecretString, cookie: AuthCookie) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            cookie,
        }
    }

    #[must_use]
    pub fn cookie(&self) -> &AuthCookie {
        &self.cookie
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Option<AuthUser>, ResolveError> {
        track_external_api_call(
            ApiType::Auth,
            "supabase",
            USER_ENDPOINT,
            &CallMetadata::default(),
            self.request_user(access_token),
        )
        .await
        .map_err(ApiCallError::into_source)
    }

    async fn request_user(&self, access_token: &str) -> Result<Option<AuthUser>, ResolveError> {
        let response = self
            .client
            .get(format!("{}{USER_ENDPOINT}", self.base_url))
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json::<AuthUser>().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status => Err(ResolveError::Backend(status)),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<StoredSession>, ResolveError> {
        track_external_api_call(
            ApiType::Auth,
            "supabase",
            TOKEN_ENDPOINT,
            &CallMetadata::default(),
            self.request_refresh(refresh_token),
        )
        .await
        .map_err(ApiCallError::into_source)
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<Option<StoredSession>, ResolveError> {
        let response = self
            .client
            .post(format!("{}{TOKEN_ENDPOINT}", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", self.anon_key.expose_secret())
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json::<StoredSession>().await?)),
            // Revoked or already-used refresh tokens.
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Ok(None),
            status => Err(ResolveError::Backend(status)),
        }
    }
}

#[async_trait]
impl SessionResolver for SupabaseResolver {
    #[instrument(skip_all)]
    async fn resolve(&self, jar: &CookieJar) -> Result<Resolution, ResolveError> {
        let Some(raw) = self.cookie.read(jar) else {
            return Ok(Resolution::anonymous());
        };

        let session: StoredSession = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(err) => {
                debug!("Discarding malformed auth cookie: {err}");
                return Ok(Resolution {
                    user: None,
                    cookies: self.cookie.clear(jar),
                });
            }
        };

        let now = unix_now();
        if !session.is_expired(now) {
            let user = self.fetch_user(&session.access_token).await?;
            return Ok(Resolution {
                user,
                cookies: super::CookieChanges::default(),
            });
        }

        let Some(refreshed) = self.refresh(&session.refresh_token).await? else {
            debug!("Refresh token rejected, clearing auth cookie");
            return Ok(Resolution {
                user: None,
                cookies: self.cookie.clear(jar),
            });
        };

        let refreshed = refreshed.with_expiry(now);
        let cookies = self.cookie.write(jar, &serde_json::to_string(&refreshed)?);

        // The old refresh token is spent now, so the new cookies must reach the
        // browser even when the user lookup fails.
        let user = match self.fetch_user(&refreshed.access_token).await {
            Ok(user) => user,
            Err(err) => {
                warn!("User lookup after refresh failed: {err}");
                None
            }
        };

        Ok(Resolution { user, cookies })
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
