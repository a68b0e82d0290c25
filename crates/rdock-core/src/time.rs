//! Wall-clock helpers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the clock is before it
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time elapsed since a millisecond timestamp. Timestamps in the future
/// (clock skew between hosts) count as zero.
pub fn age(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}
