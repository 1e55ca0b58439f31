//! Session token codec (HMAC-signed JWT).
//!
//! Claims are a fixed-shape record: `id` (subject UUID), `token_version`
//! (revocation epoch), `exp` and `iat` (unix seconds). Decoding rejects tokens
//! with any of those missing or mistyped instead of defaulting them.
//!
//! Expiry is **not** checked here. `decode` returns `exp` and the caller
//! compares it against its own clock.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use uuid::Uuid;

pub const MIN_SECRET_LEN: usize = 32;
pub const DEFAULT_ALGORITHM: &str = "HS256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed token")]
    Malformed,
    #[error("failed to encode token: {0}")]
    Encode(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenConfigError {
    #[error("token secret must be at least {MIN_SECRET_LEN} bytes")]
    SecretTooShort,
    #[error("unsupported signing algorithm: {0} (expected HS256, HS384 or HS512)")]
    UnsupportedAlgorithm(String),
}

/// Decoded session token claims.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    #[serde(rename = "id")]
    pub subject_id: Uuid,
    #[serde(rename = "token_version")]
    pub revocation_epoch: u32,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    #[serde(rename = "iat")]
    pub issued_at: i64,
}

/// Signing secret and algorithm, fixed at startup.
#[derive(Clone)]
pub struct TokenConfig {
    secret: SecretString,
    algorithm: Algorithm,
}

impl TokenConfig {
    /// # Errors
    /// Returns an error if the secret is too short or the algorithm is not an HMAC variant.
    pub fn new(secret: SecretString, algorithm: &str) -> Result<Self, TokenConfigError> {
        if secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(TokenConfigError::SecretTooShort);
        }

        let algorithm = match Algorithm::from_str(algorithm.trim()) {
            Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => alg,
            _ => return Err(TokenConfigError::UnsupportedAlgorithm(algorithm.to_string())),
        };

        Ok(Self { secret, algorithm })
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"***")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Encodes and decodes signed session tokens.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: &TokenConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();

        // Signature and algorithm only; exp and the other registered claims are
        // enforced by the authenticator.
        let mut validation = Validation::new(config.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            algorithm: config.algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a token for `subject_id` at `revocation_epoch`, expiring `ttl` from now.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized or signed.
    pub fn encode(
        &self,
        subject_id: Uuid,
        revocation_epoch: u32,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.encode_at(subject_id, revocation_epoch, ttl, unix_now())
    }

    /// Same as [`TokenCodec::encode`] with an explicit issuance time.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized or signed.
    pub fn encode_at(
        &self,
        subject_id: Uuid,
        revocation_epoch: u32,
        ttl: Duration,
        now_unix: i64,
    ) -> Result<String, TokenError> {
        let ttl_seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = SessionClaims {
            subject_id,
            revocation_epoch,
            expires_at: now_unix.saturating_add(ttl_seconds),
            issued_at: now_unix,
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Encode(err.to_string()))
    }

    /// Verify the signature and return the claims. Does not check expiry.
    ///
    /// # Errors
    /// Returns `InvalidSignature` on signature/algorithm mismatch and
    /// `Malformed` when the token or its claims are structurally invalid.
    pub fn decode(&self, token: &str) -> Result<SessionClaims, TokenError> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Current unix time in whole seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
pub(crate) const TEST_SECRET: &str = "itemkeep-test-secret-0123456789abcdef";
