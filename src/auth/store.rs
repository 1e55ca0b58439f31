//! Identity persistence contract and an in-memory implementation.
//!
//! The auth core never queries storage directly; it goes through
//! [`IdentityStore`]. Implementations must make
//! [`IdentityStore::persist_credential_update`] an atomic compare-and-swap on
//! the revocation epoch so that concurrent password changes cannot both win.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use super::epoch::INITIAL_EPOCH;

/// The part of a user record the auth core compares against tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub revocation_epoch: u32,
}

/// A user record as returned for a login lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    pub identity: Identity,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone, Debug)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The identity's epoch moved since it was read.
    #[error("credential update conflict")]
    Conflict,
    #[error("identity not found")]
    NotFound,
    #[error("email already registered")]
    Duplicate,
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up a user by login name (the account email).
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Store a new password hash and epoch if the current epoch still equals
    /// `expected_epoch`.
    ///
    /// # Errors
    /// `StoreError::Conflict` when the epoch moved, `StoreError::NotFound` when
    /// the identity is gone.
    async fn persist_credential_update(
        &self,
        id: Uuid,
        new_hash: &str,
        expected_epoch: u32,
        new_epoch: u32,
    ) -> Result<(), StoreError>;

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError>;

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<(), StoreError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_identity(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Process-local store used by tests and single-node dev runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: Mutex<HashMap<Uuid, CredentialRecord>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.lock();
        Ok(records
            .values()
            .find(|record| record.email == username)
            .cloned())
    }

    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.records.lock().get(&id).map(|record| record.identity))
    }

    async fn persist_credential_update(
        &self,
        id: Uuid,
        new_hash: &str,
        expected_epoch: u32,
        new_epoch: u32,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound)?;
        if record.identity.revocation_epoch != expected_epoch {
            return Err(StoreError::Conflict);
        }
        record.password_hash = new_hash.to_string();
        record.identity.revocation_epoch = new_epoch;
        Ok(())
    }

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let mut records = self.records.lock();
        if records.values().any(|record| record.email == new.email) {
            return Err(StoreError::Duplicate);
        }
        let identity = Identity {
            id: Uuid::new_v4(),
            revocation_epoch: INITIAL_EPOCH,
        };
        records.insert(
            identity.id,
            CredentialRecord {
                identity,
                username: new.username,
                email: new.email,
                password_hash: new.password_hash,
            },
        );
        Ok(identity)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let email_taken = update.email.as_ref().is_some_and(|email| {
            records
                .values()
                .any(|record| record.identity.id != id && &record.email == email)
        });
        if email_taken {
            return Err(StoreError::Duplicate);
        }
        let record = records.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(username) = update.username {
            record.username = username;
        }
        if let Some(email) = update.email {
            record.email = email;
        }
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.lock().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            username: "alice".to_string(),
            email: email.to_string(),
            password_hash: "hash-0".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_find() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let identity = store.create_identity(new_identity("alice@example.com")).await?;
        assert_eq!(identity.revocation_epoch, INITIAL_EPOCH);

        let by_name = store.find_identity_by_username("alice@example.com").await?;
        assert_eq!(by_name.map(|record| record.identity), Some(identity));
        assert_eq!(store.find_identity_by_id(identity.id).await?, Some(identity));
        assert!(store.find_identity_by_username("bob@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() -> Result<()> {
        let store = MemoryIdentityStore::new();
        store.create_identity(new_identity("alice@example.com")).await?;
        let result = store.create_identity(new_identity("alice@example.com")).await;
        assert!(matches!(result, Err(StoreError::Duplicate)));
        Ok(())
    }

    #[tokio::test]
    async fn credential_update_compares_epoch() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let identity = store.create_identity(new_identity("alice@example.com")).await?;

        store
            .persist_credential_update(identity.id, "hash-1", 0, 1)
            .await?;
        let stale = store
            .persist_credential_update(identity.id, "hash-2", 0, 1)
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict)));

        let record = store.find_identity_by_username("alice@example.com").await?;
        assert_eq!(
            record.map(|r| (r.password_hash, r.identity.revocation_epoch)),
            Some(("hash-1".to_string(), 1))
        );
        Ok(())
    }

    #[tokio::test]
    async fn credential_update_for_missing_identity() {
        let store = MemoryIdentityStore::new();
        let result = store
            .persist_credential_update(Uuid::new_v4(), "hash", 0, 1)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn profile_update_and_delete() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let alice = store.create_identity(new_identity("alice@example.com")).await?;
        store.create_identity(new_identity("bob@example.com")).await?;

        let taken = store
            .update_profile(
                alice.id,
                ProfileUpdate {
                    username: None,
                    email: Some("bob@example.com".to_string()),
                },
            )
            .await;
        assert!(matches!(taken, Err(StoreError::Duplicate)));

        store
            .update_profile(
                alice.id,
                ProfileUpdate {
                    username: Some("alice2".to_string()),
                    email: Some("alice2@example.com".to_string()),
                },
            )
            .await?;
        let record = store.find_identity_by_username("alice2@example.com").await?;
        assert_eq!(record.map(|r| r.username), Some("alice2".to_string()));

        assert!(store.delete_identity(alice.id).await?);
        assert!(!store.delete_identity(alice.id).await?);
        assert!(store.find_identity_by_id(alice.id).await?.is_none());
        Ok(())
    }
}
