//! Maps validated CLI arguments to the server action.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_PORT, ARG_UPSTREAM_URL, supabase};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or a URL is unusable.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let upstream_url = matches
        .get_one::<String>(ARG_UPSTREAM_URL)
        .context("missing required argument: --upstream-url")?;
    let upstream_url = supabase::parse_backend_url(upstream_url)
        .context("invalid AVATAR_GATE_UPSTREAM_URL")?;

    let supabase = supabase::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        upstream_url,
        supabase_url: supabase.url,
        anon_key: supabase.anon_key,
        service_key: supabase.service_key,
        cookie_name: supabase.cookie_name,
        cookie_secure: supabase.cookie_secure,
        upload_bucket: supabase.upload_bucket,
        asset_bucket: supabase.asset_bucket,
    }))
}
