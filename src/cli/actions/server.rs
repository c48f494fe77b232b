use crate::{
    APP_USER_AGENT,
    cli::telemetry,
    gate::{
        self, GateState,
        proxy::Upstream,
        session::{AuthCookie, SupabaseResolver},
        storage::{Storage, StorageConfig},
    },
};
use anyhow::{Context, Result};
use reqwest::{Client, redirect::Policy};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

const BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub upstream_url: Url,
    pub supabase_url: Url,
    pub anon_key: SecretString,
    pub service_key: Option<SecretString>,
    pub cookie_name: Option<String>,
    pub cookie_secure: bool,
    pub upload_bucket: String,
    pub asset_bucket: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the HTTP clients cannot be built, no cookie name can be
/// derived, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let port = args.port;
    let state = build_state(args)?;
    let result = gate::new(port, state).await;

    telemetry::shutdown_tracer();

    result
}

/// Wire the resolver, upstream and optional storage from configuration.
///
/// # Errors
/// Returns an error if an HTTP client cannot be built or no cookie name is available.
pub fn build_state(args: Args) -> Result<GateState> {
    let cookie = match args.cookie_name {
        Some(name) => AuthCookie::new(name, args.cookie_secure),
        None => AuthCookie::for_project(&args.supabase_url, args.cookie_secure)
            .context("Cannot derive auth cookie name from the Supabase URL")?,
    };

    let backend = Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(BACKEND_TIMEOUT)
        .build()
        .context("Failed to build auth backend client")?;

    let upstream = Client::builder()
        .user_agent(APP_USER_AGENT)
        .redirect(Policy::none())
        .build()
        .context("Failed to build upstream client")?;

    let storage = args.service_key.map(|service_key| {
        Arc::new(Storage::new(
            backend.clone(),
            StorageConfig {
                base_url: args.supabase_url.to_string(),
                service_key,
                upload_bucket: args.upload_bucket,
                asset_bucket: args.asset_bucket,
            },
        ))
    });

    let resolver = SupabaseResolver::new(
        backend,
        args.supabase_url.as_str(),
        args.anon_key,
        cookie,
    );

    Ok(GateState {
        resolver: Arc::new(resolver),
        upstream: Arc::new(Upstream::new(upstream, &args.upstream_url)),
        storage,
    })
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        upstream = %args.upstream_url,
        supabase = %args.supabase_url,
        cookie_name = args.cookie_name.as_deref().unwrap_or("derived"),
        cookie_secure = args.cookie_secure,
        uploads_enabled = args.service_key.is_some(),
        "Startup configuration"
    );
}
