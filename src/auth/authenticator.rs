//! Login, request authentication and credential rotation.

use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

use super::{
    credentials::CredentialHasher,
    epoch::next_epoch,
    error::AuthError,
    store::{Identity, IdentityStore, NewIdentity},
    token::{TokenCodec, unix_now},
};

/// Reference session lifetime: 20 minutes.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(20 * 60);

/// A freshly signed bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    pub access_token: String,
    pub identity: Identity,
    pub expires_at: i64,
}

pub struct SessionAuthenticator {
    store: Arc<dyn IdentityStore>,
    codec: TokenCodec,
    hasher: Arc<CredentialHasher>,
    token_ttl: Duration,
}

impl SessionAuthenticator {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, codec: TokenCodec, hasher: CredentialHasher) -> Self {
        Self {
            store,
            codec,
            hasher: Arc::new(hasher),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    #[must_use]
    pub fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Check a login name and password and issue a token.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown login name or a wrong password,
    /// `Internal` when the store or hasher fails.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionToken, AuthError> {
        let record = self.store.find_identity_by_username(username).await?;
        let password = password.to_string();

        let Some(record) = record else {
            self.with_hasher(move |hasher| hasher.verify_dummy(&password))
                .await?;
            warn!(reason = "unknown_user", "Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let stored_hash = record.password_hash;
        let matches = self
            .with_hasher(move |hasher| hasher.verify(&password, &stored_hash))
            .await?;
        if !matches {
            warn!(reason = "password_mismatch", user_id = %record.identity.id, "Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %record.identity.id, "Login succeeded");
        self.issue(record.identity)
    }

    /// Validate a bearer token against the current clock.
    ///
    /// # Errors
    /// See [`SessionAuthenticator::authenticate_at`].
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.authenticate_at(token, unix_now()).await
    }

    /// Validate a bearer token as of `now_unix`.
    ///
    /// Checks run in order: signature and shape, expiry, subject existence,
    /// revocation epoch.
    ///
    /// # Errors
    /// `InvalidToken`, `ExpiredToken`, `UnknownSubject` or `RevokedToken` for
    /// the corresponding failed check; `Internal` when the store fails.
    #[instrument(skip(self, token))]
    pub async fn authenticate_at(&self, token: &str, now_unix: i64) -> Result<Identity, AuthError> {
        let claims = self.codec.decode(token).map_err(|err| {
            debug!(reason = "invalid_token", error = %err, "Token rejected");
            AuthError::InvalidToken
        })?;

        if now_unix >= claims.expires_at {
            debug!(
                reason = "expired_token",
                user_id = %claims.subject_id,
                expires_at = claims.expires_at,
                "Token rejected"
            );
            return Err(AuthError::ExpiredToken);
        }

        let Some(identity) = self.store.find_identity_by_id(claims.subject_id).await? else {
            debug!(reason = "unknown_subject", user_id = %claims.subject_id, "Token rejected");
            return Err(AuthError::UnknownSubject);
        };

        if claims.revocation_epoch != identity.revocation_epoch {
            debug!(
                reason = "revoked_token",
                user_id = %identity.id,
                token_epoch = claims.revocation_epoch,
                current_epoch = identity.revocation_epoch,
                "Token rejected"
            );
            return Err(AuthError::RevokedToken);
        }

        Ok(identity)
    }

    /// Sign a token for `identity` at its current epoch.
    ///
    /// # Errors
    /// `Internal` if signing fails.
    pub fn issue(&self, identity: Identity) -> Result<SessionToken, AuthError> {
        self.issue_at(identity, unix_now())
    }

    fn issue_at(&self, identity: Identity, now_unix: i64) -> Result<SessionToken, AuthError> {
        let access_token = self
            .codec
            .encode_at(identity.id, identity.revocation_epoch, self.token_ttl, now_unix)
            .map_err(|err| AuthError::Internal(err.to_string()))?;
        let ttl_seconds = i64::try_from(self.token_ttl.as_secs()).unwrap_or(i64::MAX);

        Ok(SessionToken {
            access_token,
            identity,
            expires_at: now_unix.saturating_add(ttl_seconds),
        })
    }

    /// Create an account and issue its first token.
    ///
    /// # Errors
    /// `DuplicateIdentity` when the email is taken, `Internal` otherwise.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<SessionToken, AuthError> {
        let password_hash = self.hash_password(password).await?;
        let identity = self
            .store
            .create_identity(NewIdentity {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
            })
            .await
            .inspect_err(|err| warn!(error = %err, "Registration rejected"))?;

        info!(user_id = %identity.id, "Registered new identity");
        self.issue(identity)
    }

    /// Replace the password of an authenticated identity and advance its epoch.
    ///
    /// `identity` must be the snapshot the caller authenticated with: the
    /// update only lands if the stored epoch still equals
    /// `identity.revocation_epoch`. Every token minted before the change stops
    /// validating once this returns.
    ///
    /// # Errors
    /// `Conflict` if another update won the race, `UnknownSubject` if the
    /// identity was deleted, `Internal` on store or hasher failures.
    #[instrument(skip(self, new_password), fields(user_id = %identity.id))]
    pub async fn update_credentials(
        &self,
        identity: Identity,
        new_password: &str,
    ) -> Result<SessionToken, AuthError> {
        let new_hash = self.hash_password(new_password).await?;
        let new_epoch = next_epoch(identity.revocation_epoch);

        self.store
            .persist_credential_update(
                identity.id,
                &new_hash,
                identity.revocation_epoch,
                new_epoch,
            )
            .await
            .inspect_err(|err| warn!(error = %err, "Credential update rejected"))?;

        info!(
            previous_epoch = identity.revocation_epoch,
            new_epoch, "Credentials rotated"
        );
        self.issue(Identity {
            id: identity.id,
            revocation_epoch: new_epoch,
        })
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let password = password.to_string();
        self.with_hasher(move |hasher| hasher.hash(&password))
            .await?
            .map_err(|err| AuthError::Internal(err.to_string()))
    }

    // Argon2 is CPU and memory heavy; keep it off the async workers.
    async fn with_hasher<T, F>(&self, f: F) -> Result<T, AuthError>
    where
        F: FnOnce(&CredentialHasher) -> T + Send + 'static,
        T: Send + 'static,
    {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || f(&hasher))
            .await
            .map_err(|err| AuthError::Internal(format!("hashing task failed: {err}")))
    }
}

impl fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("codec", &self.codec)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}
