//! Persistence backends for [`crate::auth::IdentityStore`] and
//! [`crate::items::ItemStore`].

mod items;
mod postgres;

pub use items::PgItemStore;
pub use postgres::PgIdentityStore;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{Instrument, info_span};

/// Open the Postgres pool used by the service.
///
/// # Errors
/// Returns an error if the database is unreachable or the DSN is invalid.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let span = info_span!("db.connect", db.system = "postgresql");
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .instrument(span)
        .await
        .context("Failed to connect to database")
}
