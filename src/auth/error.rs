use std::time::Duration;
use thiserror::Error;

use super::store::StoreError;

/// Every way a caller can be turned away by the auth core.
///
/// The first five variants are authentication failures and all render as
/// `401`. Their messages are what the client sees, so the two login failure
/// causes (unknown user, wrong password) share one variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Could not validate user.")]
    InvalidCredentials,
    #[error("Could not validate user. Invalid JWT.")]
    InvalidToken,
    #[error("Token has expired. You need to log in again.")]
    ExpiredToken,
    #[error("Could not validate user. Invalid token version.")]
    RevokedToken,
    #[error("Could not validate user. User not found.")]
    UnknownSubject,
    #[error("Rate limit exceeded. Retry after {:.1} seconds", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },
    #[error("Credentials were changed concurrently. Retry the request.")]
    Conflict,
    #[error("Email already registered")]
    DuplicateIdentity,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short machine-readable kind, used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::RevokedToken => "revoked_token",
            Self::UnknownSubject => "unknown_subject",
            Self::RateLimited { .. } => "rate_limited",
            Self::Conflict => "conflict",
            Self::DuplicateIdentity => "duplicate_identity",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::Conflict,
            StoreError::NotFound => Self::UnknownSubject,
            StoreError::Duplicate => Self::DuplicateIdentity,
            StoreError::Backend(err) => Self::Internal(format!("{err:#}")),
        }
    }
}
