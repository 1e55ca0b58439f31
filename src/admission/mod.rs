//! Per-client request admission (sliding window).
//!
//! Each client fingerprint owns a queue of request instants inside the
//! trailing `period`. A request is admitted while fewer than `max_calls`
//! instants remain after pruning; otherwise it is denied with the time until
//! the oldest instant leaves the window.
//!
//! The table of windows is a bounded cache: at most `capacity` fingerprints
//! are tracked (least recently used are evicted first) and a window idle for
//! a whole period is dropped, since it would be empty anyway.

mod client;

pub use client::{UNKNOWN_CLIENT, client_address, fingerprint};

use moka::{policy::EvictionPolicy, sync::Cache};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MAX_CALLS: usize = 50;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_CAPACITY: u64 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionConfigError {
    #[error("rate limit max calls must be at least 1")]
    ZeroMaxCalls,
    #[error("rate limit period must be greater than zero")]
    ZeroPeriod,
    #[error("rate limit capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionConfig {
    max_calls: usize,
    period: Duration,
    capacity: u64,
}

impl AdmissionConfig {
    /// # Errors
    /// Returns an error if any limit is zero.
    pub fn new(
        max_calls: usize,
        period: Duration,
        capacity: u64,
    ) -> Result<Self, AdmissionConfigError> {
        if max_calls == 0 {
            return Err(AdmissionConfigError::ZeroMaxCalls);
        }
        if period.is_zero() {
            return Err(AdmissionConfigError::ZeroPeriod);
        }
        if capacity == 0 {
            return Err(AdmissionConfigError::ZeroCapacity);
        }
        Ok(Self {
            max_calls,
            period,
            capacity,
        })
    }

    #[must_use]
    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            period: DEFAULT_PERIOD,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    /// `retry_after` is always greater than zero.
    Denied { retry_after: Duration },
}

impl AdmissionDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

type Window = Arc<Mutex<VecDeque<Instant>>>;

pub struct AdmissionController {
    config: AdmissionConfig,
    windows: Cache<String, Window>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        let windows = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_idle(config.period)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { config, windows }
    }

    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Admit or deny one request for `fingerprint` at the current instant.
    pub fn admit(&self, fingerprint: &str) -> AdmissionDecision {
        self.admit_at(fingerprint, Instant::now())
    }

    /// Admit or deny one request for `fingerprint` at `now`.
    ///
    /// The prune, compare and append steps run under the fingerprint's own
    /// lock, so two requests for the same client cannot both take the last
    /// slot.
    pub fn admit_at(&self, fingerprint: &str, now: Instant) -> AdmissionDecision {
        let window = self
            .windows
            .get_with_by_ref(fingerprint, || Arc::new(Mutex::new(VecDeque::new())));
        let mut calls = window.lock();

        while calls
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.config.period)
        {
            calls.pop_front();
        }

        if calls.len() >= self.config.max_calls {
            let oldest = calls.front().copied().unwrap_or(now);
            let retry_after = self
                .config
                .period
                .saturating_sub(now.saturating_duration_since(oldest));
            debug!(
                fingerprint,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "Request denied by admission control"
            );
            return AdmissionDecision::Denied { retry_after };
        }

        calls.push_back(now);
        AdmissionDecision::Allowed
    }

    /// Number of fingerprints currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> u64 {
        self.windows.run_pending_tasks();
        self.windows.entry_count()
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
