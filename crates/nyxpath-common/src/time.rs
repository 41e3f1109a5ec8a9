// ============================================
// File: crates/nyxpath-common/src/time.rs
// ============================================
//! # Time Helpers
//!
//! Routing messages carry wall-clock and duration fields in milliseconds
//! (`T`, `L`, `B`, `X`). Lifecycle decisions use monotonic `Instant`s and
//! never the wall clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds (0 if the clock is before the epoch).
#[must_use]
pub fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, duration_millis)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
