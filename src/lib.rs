//! # Itemkeep (Item Tracking API)
//!
//! `itemkeep` serves a private item collection per user. This crate holds the
//! parts of the service that decide *who* is calling and *whether* they may
//! call right now.
//!
//! ## Sessions (token versioning)
//!
//! Login issues a signed, short-lived bearer token carrying the user id and the
//! user's current **revocation epoch**. Tokens are never stored server-side.
//! Changing a password advances the epoch, which invalidates every token issued
//! before the change the moment it happens.
//!
//! A token is accepted only when its signature verifies, it has not expired,
//! the user still exists and the embedded epoch equals the stored one.
//!
//! ## Admission Control
//!
//! Every request passes a sliding-window limiter keyed by a SHA-256
//! fingerprint of the client address. Denied requests get `429 Too Many
//! Requests` with a `Retry-After` hint. The window table is bounded in size and
//! idle entries expire after one period.
//!
//! ## Persistence
//!
//! User records are reached only through [`auth::IdentityStore`] and items
//! through [`items::ItemStore`]. The service ships Postgres implementations
//! ([`storage::PgIdentityStore`], [`storage::PgItemStore`]) and in-memory ones
//! used by tests.

pub mod admission;
pub mod api;
pub mod auth;
pub mod cli;
pub mod items;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
