//! Password hashing and verification (Argon2id).
//!
//! Hashes are stored as PHC strings, so verification always uses the cost
//! parameters the hash was created with. Changing [`HashingConfig`] only
//! affects new hashes.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use thiserror::Error;

const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
const DEFAULT_ITERATIONS: u32 = 3;
const DEFAULT_PARALLELISM: u32 = 1;

// Verified against when the login name is unknown, so both branches pay the
// same hashing cost.
const DUMMY_PASSWORD: &str = "itemkeep-timing-equalizer";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// Argon2id cost parameters for new password hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashingConfig {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl HashingConfig {
    /// Defaults tuned for roughly 100ms+ per hash on commodity hardware:
    /// 64 MiB memory, 3 iterations, 1 lane.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    #[must_use]
    pub fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Argon2id hasher for account passwords.
///
/// Holds a hash of a fixed throwaway password, made at construction with the
/// configured parameters, so an unknown-user login pays exactly one verify.
#[derive(Debug)]
pub struct CredentialHasher {
    params: Params,
    dummy_hash: String,
}

impl CredentialHasher {
    /// # Errors
    /// Returns an error if the configured cost parameters are out of range or
    /// the throwaway hash cannot be made.
    pub fn new(config: HashingConfig) -> Result<Self, CredentialError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|err| CredentialError::Params(err.to_string()))?;

        let mut hasher = Self {
            params,
            dummy_hash: String::new(),
        };
        hasher.dummy_hash = hasher.hash(DUMMY_PASSWORD)?;
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if hashing fails (e.g. the password exceeds argon2 limits).
    pub fn hash(&self, password: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| CredentialError::Hash(err.to_string()))?;
        Ok(hash.to_string())
    }

    /// Check a password against a stored PHC hash.
    ///
    /// An unparsable stored hash never verifies.
    #[must_use]
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burn the same verification cost as a real login without matching anything.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash);
    }
}

#[cfg(test)]
pub(crate) fn fast_hashing_config() -> HashingConfig {
    // Minimum argon2 cost so unit tests stay quick.
    HashingConfig::new()
        .with_memory_kib(8)
        .with_iterations(1)
        .with_parallelism(1)
}
