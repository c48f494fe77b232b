//! Timing and structured logging for calls to external services.

use std::{fmt, future::Future, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info};

/// Product area an external call belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiType {
    Auth,
    Storage,
}

impl ApiType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers attached to every log line of a tracked call. Never put tokens here.
#[derive(Clone, Debug, Default)]
pub struct CallMetadata {
    pub user_id: Option<String>,
    pub endpoint: Option<String>,
    pub external_service: Option<String>,
}

impl CallMetadata {
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Error)]
#[error("{api_type}.{operation} failed after {duration_ms}ms: {source}")]
pub struct ApiCallError<E: std::error::Error + 'static> {
    pub api_type: ApiType,
    pub operation: String,
    pub duration_ms: u64,
    #[source]
    pub source: E,
}

impl<E: std::error::Error + 'static> ApiCallError<E> {
    pub fn into_source(self) -> E {
        self.source
    }
}

/// Run `call`, logging its start, outcome and duration.
///
/// # Errors
/// Returns the call's error wrapped with the operation name and duration.
pub async fn track_api_call<T, E, F>(
    api_type: ApiType,
    operation: &str,
    metadata: &CallMetadata,
    call: F,
) -> Result<T, ApiCallError<E>>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let started = Instant::now();

    debug!(
        api_type = %api_type,
        operation,
        user_id = ?metadata.user_id,
        endpoint = ?metadata.endpoint,
        "API call started"
    );

    match call.await {
        Ok(value) => {
            let duration_ms = elapsed_ms(started);
            info!(
                api_type = %api_type,
                operation,
                duration_ms,
                user_id = ?metadata.user_id,
                        success = true,
                "API call completed"
            );
            Ok(value)
        }
        Err(source) => {
            let duration_ms = elapsed_ms(started);
            error!(
                api_type = %api_type,
                operation,
                duration_ms,
                user_id = ?metadata.user_id,
                        endpoint = ?metadata.endpoint,
                external_service = ?metadata.external_service,
                error = %source,
                success = false,
                "API call failed"
            );
            Err(ApiCallError {
                api_type,
                operation: operation.to_string(),
                duration_ms,
                source,
            })
        }
    }
}

/// Track a call to a third-party service; the operation is named
/// `<service>_<last endpoint segment>`.
///
/// # Errors
/// Same as [`track_api_call`].
pub async fn track_external_api_call<T, E, F>(
    api_type: ApiType,
    service: &str,
    endpoint: &str,
    metadata: &CallMetadata,
    call: F,
) -> Result<T, ApiCallError<E>>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let operation = external_operation(service, endpoint);
    let metadata = CallMetadata {
        endpoint: Some(endpoint.to_string()),
        external_service: Some(service.to_string()),
        ..metadata.clone()
    };
    track_api_call(api_type, &operation, &metadata, call).await
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn external_operation(service: &str, endpoint: &str) -> String {
    let last = endpoint.rsplit('/').next().unwrap_or(endpoint);
    format!("{service}_{last}")
}
