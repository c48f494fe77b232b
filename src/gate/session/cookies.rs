//! Auth cookie encoding and propagation.
//!
//! The auth backend's browser client stores the session as JSON in a single
//! cookie, or split across `<name>.0`, `<name>.1`, ... once it grows past
//! [`MAX_CHUNK_SIZE`]. Values are either raw JSON or `base64-` followed by
//! unpadded base64url.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use time::Duration;
use tracing::error;
use url::Url;

pub const MAX_CHUNK_SIZE: usize = 3180;
pub const COOKIE_MAX_AGE_SECONDS: i64 = 400 * 24 * 60 * 60;
const BASE64_PREFIX: &str = "base64-";

/// Name and attributes of the session cookie.
#[derive(Clone, Debug)]
pub struct AuthCookie {
    name: String,
    secure: bool,
}

impl AuthCookie {
    #[must_use]
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    /// Default cookie name for a project: `sb-<project-ref>-auth-token`, where
    /// the project ref is the first label of the backend host.
    #[must_use]
    pub fn for_project(backend_url: &Url, secure: bool) -> Option<Self> {
        let host = backend_url.host_str()?;
        let project_ref = host.split('.').next().filter(|label| !label.is_empty())?;
        Some(Self::new(format!("sb-{project_ref}-auth-token"), secure))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read and decode the session payload, joining chunks when needed.
    #[must_use]
    pub fn read(&self, jar: &CookieJar) -> Option<String> {
        let raw = if let Some(cookie) = jar.get(&self.name) {
            cookie.value().to_string()
        } else {
            let mut combined = String::new();
            for index in 0.. {
                match jar.get(&self.chunk_name(index)) {
                    Some(chunk) => combined.push_str(chunk.value()),
                    None => break,
                }
            }
            combined
        };

        if raw.is_empty() {
            return None;
        }

        decode_value(&raw)
    }

    /// Cookie changes that store `payload` and drop any stale chunks.
    #[must_use]
    pub fn write(&self, jar: &CookieJar, payload: &str) -> CookieChanges {
        let encoded = format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(payload));
        let mut changes = CookieChanges::default();

        if encoded.len() <= MAX_CHUNK_SIZE {
            changes.push(self.cookie(self.name.clone(), encoded));
            for index in self.existing_chunks(jar) {
                changes.push(self.removal(self.chunk_name(index)));
            }
            return changes;
        }

        // base64url output is ASCII, so byte chunks are valid strings.
        let chunks: Vec<String> = encoded
            .as_bytes()
            .chunks(MAX_CHUNK_SIZE)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();

        if jar.get(&self.name).is_some() {
            changes.push(self.removal(self.name.clone()));
        }
        for index in self.existing_chunks(jar) {
            if index >= chunks.len() {
                changes.push(self.removal(self.chunk_name(index)));
            }
        }
        for (index, chunk) in chunks.into_iter().enumerate() {
            changes.push(self.cookie(self.chunk_name(index), chunk));
        }

        changes
    }

    /// Cookie changes that remove the session and every chunk of it.
    #[must_use]
    pub fn clear(&self, jar: &CookieJar) -> CookieChanges {
        let mut changes = CookieChanges::default();
        if jar.get(&self.name).is_some() {
            changes.push(self.removal(self.name.clone()));
        }
        for index in self.existing_chunks(jar) {
            changes.push(self.removal(self.chunk_name(index)));
        }
        changes
    }

    fn chunk_name(&self, index: usize) -> String {
        format!("{}.{index}", self.name)
    }

    fn existing_chunks(&self, jar: &CookieJar) -> Vec<usize> {
        let prefix = format!("{}.", self.name);
        let mut indexes: Vec<usize> = jar
            .iter()
            .filter_map(|cookie| cookie.name().strip_prefix(&prefix)?.parse().ok())
            .collect();
        indexes.sort_unstable();
        indexes
    }

    fn cookie(&self, name: String, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(Duration::seconds(COOKIE_MAX_AGE_SECONDS))
            .build()
    }

    fn removal(&self, name: String) -> Cookie<'static> {
        Cookie::build((name, String::new()))
            .path("/")
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(Duration::ZERO)
            .build()
    }
}

fn decode_value(raw: &str) -> Option<String> {
    let Some(encoded) = raw.strip_prefix(BASE64_PREFIX) else {
        return Some(raw.to_string());
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .ok()?;
    String::from_utf8(bytes).ok()
}

fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.value().is_empty() && cookie.max_age() == Some(Duration::ZERO)
}

/// Cookie mutations produced while resolving a session.
///
/// The same set is applied to the forwarded request and to the response so
/// the app and the browser see one session.
#[derive(Clone, Debug, Default)]
pub struct CookieChanges {
    cookies: Vec<Cookie<'static>>,
}

impl CookieChanges {
    pub fn push(&mut self, cookie: Cookie<'static>) {
        self.cookies.retain(|existing| existing.name() != cookie.name());
        self.cookies.push(cookie);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie<'static>> {
        self.cookies.iter()
    }

    /// Rewrite the request `Cookie` header with the new values.
    pub fn apply_to_request(&self, headers: &mut HeaderMap) {
        if self.is_empty() {
            return;
        }

        let mut pairs: Vec<(String, String)> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        for cookie in &self.cookies {
            pairs.retain(|(name, _)| name != cookie.name());
            if !is_removal(cookie) {
                pairs.push((cookie.name().to_string(), cookie.value().to_string()));
            }
        }

        headers.remove(COOKIE);
        if pairs.is_empty() {
            return;
        }

        let header = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        match HeaderValue::from_str(&header) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(err) => error!("Failed to rebuild cookie header: {err}"),
        }
    }

    /// Append one `Set-Cookie` header per change.
    pub fn apply_to_response(&self, headers: &mut HeaderMap) {
        for cookie in &self.cookies {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(err) => error!("Failed to encode cookie {}: {err}", cookie.name()),
            }
        }
    }
}
