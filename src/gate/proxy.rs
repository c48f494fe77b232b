//! Forwarding of allowed requests to the upstream web application.

use axum::{
    body::{self, Body},
    extract::{Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CONNECTION, HOST, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE},
    },
    response::{IntoResponse, Response},
};
use reqwest::Client;
use tracing::error;
use url::Url;

use super::{GateState, session::AuthUser};

pub const AUTH_USER_HEADER: &str = "x-auth-user-id";
const FORWARDED_HOST: &str = "x-forwarded-host";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const MAX_REQUEST_BYTES: usize = 25 * 1024 * 1024;

/// Upstream web application origin.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: Client,
    base: String,
}

impl Upstream {
    /// `client` must not follow redirects; they belong to the browser.
    #[must_use]
    pub fn new(client: Client, base: &Url) -> Self {
        Self {
            client,
            base: base.as_str().trim_end_matches('/').to_string(),
        }
    }

    /// Send `request` upstream and relay the answer.
    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |value| value.as_str());
        let target = format!("{}{path_and_query}", self.base);

        let bytes = match body::to_bytes(body, MAX_REQUEST_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Failed to read request body: {err}");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };

        let user = parts.extensions.get::<AuthUser>();
        let headers = upstream_headers(&parts.headers, user);

        let upstream = match self
            .client
            .request(parts.method, &target)
            .headers(headers)
            .body(bytes)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!("Upstream request to {target} failed: {err}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

// axum fallback handler for everything the gate allowed
pub async fn proxy(State(state): State<GateState>, request: Request) -> Response {
    state.upstream.forward(request).await
}

fn upstream_headers(incoming: &HeaderMap, user: Option<&AuthUser>) -> HeaderMap {
    let mut headers = incoming.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    headers.remove(AUTH_USER_HEADER);

    // forwarding headers describe this hop, never what the client claims
    headers.remove(FORWARDED_HOST);
    if let Some(host) = incoming.get(HOST) {
        headers.insert(FORWARDED_HOST, host.clone());
    }
    headers.insert(FORWARDED_PROTO, HeaderValue::from_static("http"));
    if let Some(user) = user {
        if let Ok(value) = HeaderValue::from_str(&user.id.to_string()) {
            headers.insert(AUTH_USER_HEADER, value);
        }
    }

    headers
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // headers named by Connection are hop-by-hop as well
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [CONNECTION, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
