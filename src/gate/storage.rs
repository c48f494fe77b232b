//! Object storage for user uploads.
//!
//! Uploads go through the service key, so this client must only run
//! server-side. Callers validate size and type before handing bytes over.

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use ulid::Ulid;

use super::tracking::{ApiCallError, ApiType, CallMetadata, track_external_api_call};

pub const DEFAULT_UPLOAD_BUCKET: &str = "user-uploads";
pub const DEFAULT_ASSET_BUCKET: &str = "media-asset";
const DEFAULT_MIME: &str = "image/jpeg";
const CACHE_CONTROL: &str = "max-age=3600";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("storage upload rejected with {status}: {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("invalid data URL")]
    InvalidDataUrl,
    #[error("invalid base64 payload")]
    InvalidBase64,
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub base_url: String,
    pub service_key: SecretString,
    pub upload_bucket: String,
    pub asset_bucket: String,
}

/// Storage REST client for one project.
pub struct Storage {
    client: Client,
    config: StorageConfig,
}

impl Storage {
    #[must_use]
    pub fn new(client: Client, mut config: StorageConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    /// Upload `bytes` for `user_id` and return the public URL of the object.
    ///
    /// Only `image/*` content is accepted.
    ///
    /// # Errors
    /// Returns an error for non-image content, or if the storage backend is
    /// unreachable or rejects the upload.
    pub async fn upload(
        &self,
        user_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        if !is_image(content_type) {
            return Err(StorageError::UnsupportedType(content_type.to_string()));
        }

        let path = object_path(user_id, file_name, content_type);
        let endpoint = format!("/storage/v1/object/{}/{path}", self.config.upload_bucket);
        let metadata = CallMetadata::default().with_user_id(user_id);

        track_external_api_call(
            ApiType::Storage,
            "supabase",
            &endpoint,
            &metadata,
            self.put_object(&endpoint, content_type, bytes),
        )
        .await
        .map_err(ApiCallError::into_source)?;

        Ok(format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.config.base_url, self.config.upload_bucket
        ))
    }

    async fn put_object(
        &self,
        endpoint: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StorageError> {
        let response = self
            .client
            .post(format!("{}{endpoint}", self.config.base_url))
            .bearer_auth(self.config.service_key.expose_secret())
            .header("apikey", self.config.service_key.expose_secret())
            .header("content-type", content_type)
            .header("cache-control", CACHE_CONTROL)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Rejected { status, message })
    }

    /// Upload an image given as a `data:` URL.
    ///
    /// # Errors
    /// Returns an error if the data URL is malformed or the upload fails.
    pub async fn upload_data_url(
        &self,
        user_id: &str,
        data_url: &str,
    ) -> Result<String, StorageError> {
        let (bytes, mime) = decode_data_url(data_url)?;
        self.upload(user_id, "", &mime, bytes).await
    }

    /// Public URL for a stored asset path.
    #[must_use]
    pub fn public_url(&self, path: &str) -> String {
        public_url(&self.config.base_url, &self.config.asset_bucket, path)
    }
}

/// Whether a content type names an image.
#[must_use]
pub fn is_image(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// Object key for an upload: `image/<user>/<millis>-<random>.<ext>`.
#[must_use]
pub fn object_path(user_id: &str, file_name: &str, content_type: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let suffix = Ulid::new().to_string().to_lowercase();
    let ext = extension(file_name, content_type);
    format!("image/{user_id}/{millis}-{suffix}.{ext}")
}

fn extension(file_name: &str, content_type: &str) -> String {
    if let Some((_, ext)) = file_name.rsplit_once('.') {
        if !ext.is_empty() {
            return ext.to_lowercase();
        }
    }
    content_type
        .split_once('/')
        .map(|(_, subtype)| subtype.split(['+', ';']).next().unwrap_or(subtype))
        .filter(|subtype| !subtype.is_empty())
        .map_or_else(|| "bin".to_string(), |subtype| subtype.trim().to_lowercase())
}

/// Split a `data:<mime>;base64,<payload>` URL into bytes and mime type.
///
/// # Errors
/// Returns an error if there is no payload or it is not valid base64.
pub fn decode_data_url(data_url: &str) -> Result<(Vec<u8>, String), StorageError> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or(StorageError::InvalidDataUrl)?;

    let mime = header
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_MIME)
        .to_string();

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| StorageError::InvalidBase64)?;

    Ok((bytes, mime))
}

/// Resolve a stored asset path to a public URL.
///
/// Absolute URLs pass through unchanged and an empty path stays empty.
#[must_use]
pub fn public_url(base_url: &str, asset_bucket: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let clean = path.strip_prefix('/').unwrap_or(path);
    let bucket_prefix = format!("{asset_bucket}/");
    let full = if clean.starts_with(&bucket_prefix) {
        clean.to_string()
    } else {
        format!("{bucket_prefix}{clean}")
    };

    format!(
        "{}/storage/v1/object/public/{full}",
        base_url.trim_end_matches('/')
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn storage(server: &MockServer) -> Storage {
        Storage::new(
            Client::new(),
            StorageConfig {
                base_url: format!("{}/", server.base_url()),
                service_key: SecretString::from("service-key"),
                upload_bucket: DEFAULT_UPLOAD_BUCKET.to_string(),
                asset_bucket: DEFAULT_ASSET_BUCKET.to_string(),
            },
        )
    }

    #[test]
    fn object_path_layout() {
        let path = object_path("user-1", "photo.PNG", "image/png");
        assert!(path.starts_with("image/user-1/"));
        assert!(path.ends_with(".png"));
        let name = path.rsplit('/').next().unwrap();
        let (millis, _) = name.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
    }

    #[test]
    fn object_paths_are_unique() {
        assert_ne!(
            object_path("u", "a.jpg", "image/jpeg"),
            object_path("u", "a.jpg", "image/jpeg")
        );
    }

    #[test]
    fn extension_falls_back_to_mime() {
        assert_eq!(extension("noext", "image/webp"), "webp");
        assert_eq!(extension("noext", "image/svg+xml"), "svg");
        assert_eq!(extension("noext", ""), "bin");
        assert_eq!(extension("a.tar.gz", "application/gzip"), "gz");
    }

    #[test]
    fn decode_data_url_reads_mime() {
        let (bytes, mime) = decode_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn decode_data_url_defaults_mime() {
        let (_, mime) = decode_data_url("aGVsbG8=,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/jpeg");
    }

    #[test]
    fn decode_data_url_rejects_garbage() {
        assert!(matches!(
            decode_data_url("no-comma"),
            Err(StorageError::InvalidDataUrl)
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(StorageError::InvalidBase64)
        ));
    }

    #[test]
    fn image_types() {
        assert!(is_image("image/png"));
        assert!(is_image("Image/WEBP"));
        assert!(!is_image("text/html"));
        assert!(!is_image("application/octet-stream"));
        assert!(!is_image(""));
    }

    #[tokio::test]
    async fn non_image_data_url_is_refused_before_upload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let result = storage(&server)
            .upload_data_url("u", "data:text/html;base64,PHNjcmlwdD48L3NjcmlwdD4=")
            .await;

        assert!(matches!(result, Err(StorageError::UnsupportedType(ref t)) if t == "text/html"));
        mock.assert_hits_async(0).await;
    }

    #[test]
    fn public_url_rules() {
        let base = "https://proj.supabase.co/";
        assert_eq!(public_url(base, "media-asset", ""), "");
        assert_eq!(
            public_url(base, "media-asset", "https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(
            public_url(base, "media-asset", "/avatars/a.png"),
            "https://proj.supabase.co/storage/v1/object/public/media-asset/avatars/a.png"
        );
        assert_eq!(
            public_url(base, "media-asset", "media-asset/a.png"),
            "https://proj.supabase.co/storage/v1/object/public/media-asset/a.png"
        );
    }

    #[tokio::test]
    async fn upload_returns_public_url() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path_contains("/storage/v1/object/user-uploads/image/user-1/")
                    .header("authorization", "Bearer service-key")
                    .header("x-upsert", "true")
                    .header("content-type", "image/png")
                    .body("png-bytes");
                then.status(200).json_body(serde_json::json!({ "Key": "ok" }));
            })
            .await;

        let url = storage(&server)
            .upload("user-1", "a.png", "image/png", b"png-bytes".to_vec())
            .await
            .unwrap();

        mock.assert_async().await;
        let prefix = format!(
            "{}/storage/v1/object/public/user-uploads/image/user-1/",
            server.base_url()
        );
        assert!(url.starts_with(&prefix), "{url}");
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn upload_surfaces_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(413).body("Payload too large");
            })
            .await;

        let result = storage(&server)
            .upload("user-1", "a.png", "image/png", vec![0; 8])
            .await;
        match result {
            Err(StorageError::Rejected { status, message }) => {
                assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
                assert_eq!(message, "Payload too large");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_data_url_uses_decoded_mime() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .header("content-type", "image/gif")
                    .body("hello");
                then.status(200);
            })
            .await;

        let url = storage(&server)
            .upload_data_url("u", "data:image/gif;base64,aGVsbG8=")
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(url.ends_with(".gif"));
    }

    #[test]
    fn storage_public_url_uses_asset_bucket() {
        let storage = Storage::new(
            Client::new(),
            StorageConfig {
                base_url: "https://proj.supabase.co".to_string(),
                service_key: SecretString::from("k"),
                upload_bucket: DEFAULT_UPLOAD_BUCKET.to_string(),
                asset_bucket: "assets".to_string(),
            },
        );
        assert_eq!(
            storage.public_url("a.png"),
            "https://proj.supabase.co/storage/v1/object/public/assets/a.png"
        );
    }
}
