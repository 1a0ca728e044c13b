//! # Job Retry Backoff
//!
//! Deterministic delay schedule for failed queue jobs.
//!
//! ```text
//! attempt:   1      2      3      4      5 ...
//! delay:     d      2d     4d     8d     16d   (capped at max)
//! ```
//!
//! Unlike in-run provider retries this schedule has no jitter, so the
//! `processAt` of a retrying job is predictable from its attempt count.

use std::time::Duration;

/// Delay before the next try of a job that has failed `attempts` times.
///
/// `attempts` is clamped to at least 1; the result never exceeds `max`.
pub fn retry_delay(base: Duration, attempts: u32, max: Duration) -> Duration {
    let exponent = attempts.max(1) - 1;
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}
