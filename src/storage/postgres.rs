use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, error, info_span};
use uuid::Uuid;

use crate::auth::{
    CredentialRecord, Identity, IdentityStore, NewIdentity, ProfileUpdate, StoreError,
    epoch::INITIAL_EPOCH,
};

/// [`IdentityStore`] backed by the `users` table (see `sql/schema.sql`).
#[derive(Clone, Debug)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(super) fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn epoch_from_db(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Backend(anyhow!("negative token_version {value}")))
}

fn epoch_to_db(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Backend(anyhow!("token_version {value} out of range")))
}

fn identity_from_row(row: &PgRow) -> Result<Identity, StoreError> {
    let id: Uuid = row.try_get("id").context("Failed to read users.id")?;
    let epoch: i32 = row
        .try_get("token_version")
        .context("Failed to read users.token_version")?;
    Ok(Identity {
        id,
        revocation_epoch: epoch_from_db(epoch)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub(super) fn backend(err: sqlx::Error, what: &'static str) -> StoreError {
    error!("{what}: {err}");
    StoreError::Backend(anyhow::Error::new(err).context(what))
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let query = "SELECT id, username, email, hashed_password, token_version FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "Failed to look up user by email"))?;

        row.map(|row| {
            Ok(CredentialRecord {
                identity: identity_from_row(&row)?,
                username: row.try_get("username").context("Failed to read users.username")?,
                email: row.try_get("email").context("Failed to read users.email")?,
                password_hash: row
                    .try_get("hashed_password")
                    .context("Failed to read users.hashed_password")?,
            })
        })
        .transpose()
    }

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = "SELECT id, token_version FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "Failed to look up user by id"))?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn persist_credential_update(
        &self,
        id: Uuid,
        new_hash: &str,
        expected_epoch: u32,
        new_epoch: u32,
    ) -> Result<(), StoreError> {
        let query = "UPDATE users SET hashed_password = $2, token_version = $4 WHERE id = $1 AND token_version = $3";
        let result = sqlx::query(query)
            .bind(id)
            .bind(new_hash)
            .bind(epoch_to_db(expected_epoch)?)
            .bind(epoch_to_db(new_epoch)?)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(|err| backend(err, "Failed to update credentials"))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Zero rows: either the epoch moved or the row is gone.
        match self.find_identity_by_id(id).await? {
            Some(_) => Err(StoreError::Conflict),
            None => Err(StoreError::NotFound),
        }
    }

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let query = "INSERT INTO users (id, username, email, hashed_password, token_version) VALUES ($1, $2, $3, $4, $5)";
        let identity = Identity {
            id: Uuid::new_v4(),
            revocation_epoch: INITIAL_EPOCH,
        };
        sqlx::query(query)
            .bind(identity.id)
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(epoch_to_db(identity.revocation_epoch)?)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate
                } else {
                    backend(err, "Failed to insert user")
                }
            })?;

        Ok(identity)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<(), StoreError> {
        let query = "UPDATE users SET username = COALESCE($2, username), email = COALESCE($3, email) WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(update.username)
            .bind(update.email)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate
                } else {
                    backend(err, "Failed to update profile")
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .map_err(|err| backend(err, "Failed to delete user"))?;

        Ok(result.rows_affected() > 0)
    }
}
