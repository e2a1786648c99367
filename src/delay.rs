//! Bounded polling helper.
//!
//! Readiness waits and the required-extension wait both repeat a cheap
//! probe at a fixed short latency until it succeeds, asks to stop, or the
//! configured timeout elapses.

use std::thread;
use std::time::Duration;

use crate::error::ExtensionError;

/// Millisecond latency between probe attempts.
pub const INIT_LATENCY_MS: u64 = 20;

/// Repeats `predicate` every [`INIT_LATENCY_MS`] until it succeeds, sets
/// the stop flag, or the timeout elapses; returns the last probe result.
///
/// The timeout is `timeout_seconds` converted to milliseconds, clamped so
/// the loop always polls for at least `10 * INIT_LATENCY_MS` even when the
/// flag is "0". A predicate may set its `stop` argument to end the loop
/// immediately with whatever it returned.
pub fn delay<F>(timeout_seconds: u64, mut predicate: F) -> Result<(), ExtensionError>
where
    F: FnMut(&mut bool) -> Result<(), ExtensionError>,
{
    let mut timeout_ms = timeout_seconds.saturating_mul(1000);
    if timeout_ms < INIT_LATENCY_MS * 10 {
        timeout_ms = INIT_LATENCY_MS * 10;
    }

    let mut elapsed = 0u64;
    loop {
        let mut stop = false;
        let status = predicate(&mut stop);
        if stop || status.is_ok() {
            return status;
        }

        elapsed += INIT_LATENCY_MS;
        thread::sleep(Duration::from_millis(INIT_LATENCY_MS));
        if elapsed >= timeout_ms {
            return status;
        }
    }
}
