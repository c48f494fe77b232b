//! Session resolution against the auth backend.
//!
//! Flow: read the auth cookie, refresh the tokens when they are about to
//! expire, then ask the backend who the access token belongs to. Any failure
//! on the way collapses to "no session" in [`resolve_or_anonymous`]; callers
//! never see an authenticated result they did not earn.

pub mod cookies;
mod supabase;

pub use self::cookies::{AuthCookie, CookieChanges};
pub use self::supabase::SupabaseResolver;

use async_trait::async_trait;
use axum_extra::extract::cookie::CookieJar;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Identity of the visitor as reported by the auth backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Per-request view of the session.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub user: Option<AuthUser>,
    pub cookies: CookieChanges,
}

impl Resolution {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated(user: AuthUser) -> Self {
        Self {
            user: Some(user),
            cookies: CookieChanges::default(),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("auth backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("auth backend returned {0}")]
    Backend(StatusCode),
    #[error("invalid session payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Resolve the cookies of one request.
    ///
    /// # Errors
    /// Returns an error when the backend cannot be reached or answers with an
    /// unexpected status.
    async fn resolve(&self, jar: &CookieJar) -> Result<Resolution, ResolveError>;
}

/// Resolve a session, treating every error as an anonymous visitor.
pub async fn resolve_or_anonymous(resolver: &dyn SessionResolver, jar: &CookieJar) -> Resolution {
    match resolver.resolve(jar).await {
        Ok(resolution) => resolution,
        Err(err) => {
            warn!("Session resolution failed, continuing as anonymous: {err}");
            Resolution::anonymous()
        }
    }
}
