//! Revocation epoch arithmetic.
//!
//! The epoch is a bounded counter: it advances by one per credential change
//! and wraps to zero after `EPOCH_MODULUS - 1`. A token minted at epoch `e`
//! would validate again after exactly `EPOCH_MODULUS` further changes, which
//! cannot happen within a single token TTL in practice.

pub const EPOCH_MODULUS: u32 = 65_536;

/// Epoch a freshly registered identity starts at.
pub const INITIAL_EPOCH: u32 = 0;

/// Return the epoch that follows `current`.
#[must_use]
pub const fn next_epoch(current: u32) -> u32 {
    (current % EPOCH_MODULUS + 1) % EPOCH_MODULUS
}
