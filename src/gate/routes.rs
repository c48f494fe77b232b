//! Path classification for the edge gate.

/// Access tier of a request path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    /// Reachable without a session; authenticated visitors are sent home.
    Public,
    /// API endpoints that carry their own credentials (auth callbacks, webhooks).
    PublicApi,
    /// Everything else.
    Protected,
}

const PUBLIC_PREFIXES: [&str; 2] = ["/login", "/signup"];
const PUBLIC_API_PREFIXES: [&str; 2] = ["/api/auth", "/api/webhooks"];

// Framework assets, the favicon, public files and API routes never reach the gate.
const UNGATED_PREFIXES: [&str; 5] = [
    "/_next/static",
    "/_next/image",
    "/favicon.ico",
    "/public",
    "/api",
];

/// Classify a request path.
///
/// `/` is only public on an exact match; the other rules are prefix matches.
#[must_use]
pub fn classify(path: &str) -> RouteClass {
    if path == "/" || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return RouteClass::Public;
    }

    if PUBLIC_API_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return RouteClass::PublicApi;
    }

    RouteClass::Protected
}

/// Whether a path falls under `/api`.
#[must_use]
pub fn is_api(path: &str) -> bool {
    path.starts_with("/api")
}

/// Whether the edge gate runs for this path at all.
#[must_use]
pub fn is_gated(path: &str) -> bool {
    !UNGATED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}
