//! # authgate
//!
//! Credential authentication service: registers accounts, authenticates them
//! and serves their public profile.
//!
//! Account truth lives in one of two places, selected at startup:
//!
//! - **direct**: accounts and bcrypt hashes in `PostgreSQL`, reached through
//!   the crate's own bounded [`pool::ResourcePool`];
//! - **delegated**: credentials at an external identity provider, with only
//!   profile rows (keyed by the provider's account id) kept locally.
//!
//! The [`engine::AuthEngine`] drives both modes; [`authgate`] exposes it over
//! HTTP and [`cli`] wires configuration, telemetry and startup.

pub mod authgate;
pub mod cli;
pub mod engine;
pub mod hasher;
pub mod pool;
pub mod provider;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
