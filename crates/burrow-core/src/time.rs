//! Time utilities for burrow
//!
//! Persisted expiry timestamps are unix milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is set before the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Timestamp `after` past `base_millis`, saturating at `u64::MAX`.
pub fn millis_after(base_millis: u64, after: Duration) -> u64 {
    base_millis.saturating_add(after.as_millis() as u64)
}

/// Wall clock anchored once and advanced by a monotonic clock.
///
/// Reading it twice never goes backwards even if the system clock is
/// adjusted in between. The monotonic side uses tokio's clock, so paused
/// test runtimes move it with `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    wall_millis: u64,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    /// Anchor at the current wall-clock time
    pub fn new() -> Self {
        Self::anchored_at(current_time_millis())
    }

    /// Anchor at an explicit wall-clock time
    pub fn anchored_at(wall_millis: u64) -> Self {
        Self {
            wall_millis,
            started: tokio::time::Instant::now(),
        }
    }

    /// Current time in unix milliseconds
    pub fn now_millis(&self) -> u64 {
        millis_after(self.wall_millis, self.started.elapsed())
    }
}

impl Default for AnchoredClock {
    fn default() -> Self {
        Self::new()
    }
}
