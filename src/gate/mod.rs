//! HTTP side of the gateway: the edge gate, upstream forwarding and the
//! upload endpoints.

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;

pub mod handlers;
pub mod middleware;
pub mod policy;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod storage;
pub mod tracking;

use self::{proxy::Upstream, session::SessionResolver, storage::Storage};

const REQUEST_ID: &str = "x-request-id";

/// Shared state for the gate, the proxy and the upload handlers.
#[derive(Clone)]
pub struct GateState {
    pub resolver: Arc<dyn SessionResolver>,
    pub upstream: Arc<Upstream>,
    pub storage: Option<Arc<Storage>>,
}

/// Build the application router.
///
/// `/health` sits outside the gate. Upload and asset routes are only mounted when
/// storage is configured; everything else falls through the gate into the
/// upstream proxy.
pub fn router(state: GateState) -> Router {
    let mut gated = Router::new();

    if state.storage.is_some() {
        gated = gated
            .route("/api/uploads", post(handlers::upload_raw))
            .route("/api/uploads/base64", post(handlers::upload_base64))
            .route("/api/assets/url", get(handlers::asset_url))
            .layer(DefaultBodyLimit::max(handlers::uploads::MAX_UPLOAD_BYTES));
    }

    let gated = gated
        .fallback(proxy::proxy)
        .layer(from_fn_with_state(state.clone(), middleware::edge_gate))
        .with_state(state);

    Router::new()
        .route("/health", get(handlers::health))
        .merge(gated)
}

/// Start the server
/// # Errors
/// Return error if the listener cannot be bound or the server fails
pub async fn new(port: u16, state: GateState) -> Result<()> {
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
