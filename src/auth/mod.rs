//! Authentication and session integrity.
//!
//! Flow Overview:
//! 1) `login` looks up the identity by email and verifies the Argon2id hash.
//! 2) A signed token carries the user id and the identity's revocation epoch.
//! 3) `authenticate` checks signature, expiry, subject and epoch, in that order.
//! 4) A password change advances the epoch with a compare-and-swap, which
//!    revokes every earlier token for that identity.

pub mod authenticator;
pub mod credentials;
pub mod epoch;
pub mod error;
pub mod store;
pub mod token;

pub use authenticator::{DEFAULT_TOKEN_TTL, SessionAuthenticator, SessionToken};
pub use credentials::{CredentialHasher, HashingConfig};
pub use error::AuthError;
pub use store::{
    CredentialRecord, Identity, IdentityStore, MemoryIdentityStore, NewIdentity, ProfileUpdate,
    StoreError,
};
pub use token::{SessionClaims, TokenCodec, TokenConfig};
