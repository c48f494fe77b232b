//! # avatar-gate
//!
//! Edge authentication gateway for the avatar shopping web app. Every request
//! that is not a static asset or an `/api` route passes through the gate
//! before it reaches the web application:
//!
//! 1. The session cookie is resolved once against the auth backend. Any
//!    failure is treated as "no session".
//! 2. The path is classified as `Public`, `PublicApi` or `Protected`.
//! 3. Exactly one outcome is produced: forward to the upstream app, redirect
//!    to `/login?redirect=<path>`, reject with a `401` JSON body, or redirect
//!    authenticated visitors away from `/login` and `/signup` to `/`.
//!
//! Refreshed session cookies are written back onto both the forwarded request
//! and the response so the browser and the app observe the same session.
//!
//! The [`guard`] module carries the same policy for in-page checks that run
//! after hydration.

pub mod cli;
pub mod gate;
pub mod guard;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
