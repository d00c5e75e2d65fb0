//! Bounded retry of transient storage errors.
//!
//! SQLite reports a busy/locked database when another writer holds the
//! file; these resolve quickly, so each operation gets a small retry
//! budget with jittered exponential backoff before the failure surfaces
//! as `Unavailable`.

use std::time::Duration;

use rand::Rng;

/// Attempts per operation, including the first.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY_MS: u64 = 25;

/// Delay before retry number `attempt` (0-based), with ±50% jitter.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY_MS * (1 << attempt.min(6)) as u64;
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((base as f64 * jitter) as u64)
}
