//! Image uploads and asset URLs for signed-in users.
//!
//! These routes live under `/api`, which the edge gate never sees, so each
//! handler resolves the session on its own and answers with the JSON `401`
//! when there is none. Request bodies are only parsed once a session exists.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::gate::{
    GateState, policy,
    session::{AuthUser, Resolution, resolve_or_anonymous},
    storage::{Storage, StorageError},
};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Base64Upload {
    pub data_url: String,
}

#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    pub path: Option<String>,
}

// axum handler for raw image uploads
pub async fn upload_raw(
    State(state): State<GateState>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let file_name = query.file_name.unwrap_or_default();

    with_session(&state, &jar, |storage, user| async move {
        if body.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "Empty upload");
        }

        let result = storage
            .upload(&user.id.to_string(), &file_name, &content_type, body.to_vec())
            .await;
        upload_response(result)
    })
    .await
}

// axum handler for `data:` URL uploads
pub async fn upload_base64(
    State(state): State<GateState>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    with_session(&state, &jar, |storage, user| async move {
        let Ok(payload) = serde_json::from_slice::<Base64Upload>(&body) else {
            return error_response(StatusCode::BAD_REQUEST, "Invalid request body");
        };

        let result = storage
            .upload_data_url(&user.id.to_string(), &payload.data_url)
            .await;
        upload_response(result)
    })
    .await
}

// axum handler resolving a stored asset path to its public URL
pub async fn asset_url(
    State(state): State<GateState>,
    jar: CookieJar,
    Query(query): Query<AssetQuery>,
) -> Response {
    with_session(&state, &jar, |storage, _user| async move {
        let path = query.path.unwrap_or_default();
        if path.trim().is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "Missing asset path");
        }
        Json(json!({ "url": storage.public_url(path.trim()) })).into_response()
    })
    .await
}

async fn with_session<F, Fut>(state: &GateState, jar: &CookieJar, run: F) -> Response
where
    F: FnOnce(std::sync::Arc<Storage>, AuthUser) -> Fut,
    Fut: std::future::Future<Output = Response>,
{
    let Some(storage) = state.storage.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Resolution { user, cookies } = resolve_or_anonymous(state.resolver.as_ref(), jar).await;

    let mut response = match user {
        Some(user) => run(storage, user).await,
        None => policy::unauthorized(),
    };

    cookies.apply_to_response(response.headers_mut());
    response
}

fn upload_response(result: Result<String, StorageError>) -> Response {
    match result {
        Ok(url) => Json(json!({ "url": url })).into_response(),
        Err(StorageError::InvalidDataUrl | StorageError::InvalidBase64) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid image data")
        }
        Err(StorageError::UnsupportedType(content_type)) => {
            warn!("Refused upload of {content_type:?}");
            error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Only images can be uploaded")
        }
        Err(err) => {
            error!("Upload failed: {err}");
            error_response(StatusCode::BAD_GATEWAY, "Upload failed")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
