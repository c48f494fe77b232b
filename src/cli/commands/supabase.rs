use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_SUPABASE_URL: &str = "supabase-url";
pub const ARG_SUPABASE_ANON_KEY: &str = "supabase-anon-key";
pub const ARG_SUPABASE_SERVICE_KEY: &str = "supabase-service-key";
pub const ARG_AUTH_COOKIE_NAME: &str = "auth-cookie-name";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_UPLOAD_BUCKET: &str = "upload-bucket";
pub const ARG_ASSET_BUCKET: &str = "asset-bucket";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_auth_args(command);
    with_storage_args(command)
}

fn with_auth_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SUPABASE_URL)
                .long(ARG_SUPABASE_URL)
                .help("Auth backend base URL, e.g. https://<project>.supabase.co")
                .env("AVATAR_GATE_SUPABASE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SUPABASE_ANON_KEY)
                .long(ARG_SUPABASE_ANON_KEY)
                .help("Public (anon) API key of the auth backend")
                .env("AVATAR_GATE_SUPABASE_ANON_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_AUTH_COOKIE_NAME)
                .long(ARG_AUTH_COOKIE_NAME)
                .help("Session cookie name (default: sb-<project-ref>-auth-token)")
                .env("AVATAR_GATE_AUTH_COOKIE_NAME"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark rewritten session cookies as Secure")
                .env("AVATAR_GATE_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
}

fn with_storage_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SUPABASE_SERVICE_KEY)
                .long(ARG_SUPABASE_SERVICE_KEY)
                .help("Service role key; enables the upload endpoints")
                .env("AVATAR_GATE_SUPABASE_SERVICE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_UPLOAD_BUCKET)
                .long(ARG_UPLOAD_BUCKET)
                .help("Bucket receiving user uploads")
                .env("AVATAR_GATE_UPLOAD_BUCKET")
                .default_value(crate::gate::storage::DEFAULT_UPLOAD_BUCKET),
        )
        .arg(
            Arg::new(ARG_ASSET_BUCKET)
                .long(ARG_ASSET_BUCKET)
                .help("Bucket used for bare asset paths")
                .env("AVATAR_GATE_ASSET_BUCKET")
                .default_value(crate::gate::storage::DEFAULT_ASSET_BUCKET),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: Url,
    pub anon_key: SecretString,
    pub service_key: Option<SecretString>,
    pub cookie_name: Option<String>,
    pub cookie_secure: bool,
    pub upload_bucket: String,
    pub asset_bucket: String,
}

impl Options {
    /// Read and validate the auth backend settings.
    ///
    /// # Errors
    /// Returns an error if the URL or anon key is missing, or the URL has no host.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let raw_url = matches
            .get_one::<String>(ARG_SUPABASE_URL)
            .filter(|value| !value.trim().is_empty())
            .context("missing required argument: --supabase-url")?;
        let url = parse_backend_url(raw_url)?;

        let anon_key = matches
            .get_one::<String>(ARG_SUPABASE_ANON_KEY)
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --supabase-anon-key")?;

        let service_key = matches
            .get_one::<String>(ARG_SUPABASE_SERVICE_KEY)
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .map(SecretString::from);

        Ok(Self {
            url,
            anon_key,
            service_key,
            cookie_name: matches.get_one::<String>(ARG_AUTH_COOKIE_NAME).cloned(),
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            upload_bucket: matches
                .get_one::<String>(ARG_UPLOAD_BUCKET)
                .cloned()
                .unwrap_or_else(|| crate::gate::storage::DEFAULT_UPLOAD_BUCKET.to_string()),
            asset_bucket: matches
                .get_one::<String>(ARG_ASSET_BUCKET)
                .cloned()
                .unwrap_or_else(|| crate::gate::storage::DEFAULT_ASSET_BUCKET.to_string()),
        })
    }
}

/// Parse a base URL that must carry a host.
///
/// # Errors
/// Returns an error if the value is not a URL or has no host.
pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let parsed = Url::parse(raw).with_context(|| format!("Invalid URL: {raw}"))?;
    if parsed.host_str().is_none() {
        return Err(anyhow!("URL must include a valid host: {raw}"));
    }
    Ok(parsed)
}
