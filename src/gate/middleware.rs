//! The edge gate: one session lookup, one decision, one response.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use super::{
    GateState,
    policy,
    routes,
    session::resolve_or_anonymous,
};

/// Gate a request before it reaches the upstream app.
///
/// Ungated paths pass straight through without touching the auth backend.
/// For everything else the session is resolved once, the path classified and
/// exactly one outcome produced. Cookie changes from a refresh are written to
/// the forwarded request and to whatever response goes back.
pub async fn edge_gate(
    State(state): State<GateState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !routes::is_gated(&path) {
        return next.run(request).await;
    }

    let jar = CookieJar::from_headers(request.headers());
    let resolution = resolve_or_anonymous(state.resolver.as_ref(), &jar).await;
    let class = routes::classify(&path);
    let decision = policy::decide(resolution.is_authenticated(), &path, class);

    debug!(path = %path, ?class, ?decision, "Gate decision");

    let mut response = match decision.response() {
        Some(response) => response,
        None => {
            resolution.cookies.apply_to_request(request.headers_mut());
            if let Some(user) = resolution.user {
                request.extensions_mut().insert(user);
            }
            next.run(request).await
        }
    };

    resolution.cookies.apply_to_response(response.headers_mut());
    response
}
