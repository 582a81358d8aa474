/*!
 * Wall Clock Helpers
 * Millisecond timestamps used for windows, events and scheduling
 */

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub type Millis = i64;

/// Current wall-clock time in milliseconds
#[inline]
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Duration between two timestamps, clamped at zero
///
/// Clock slew on virtualized hosts can make `end` precede `start`.
#[inline]
pub fn elapsed_between(start: Millis, end: Millis) -> Millis {
    (end - start).max(0)
}

/// Convert a duration to whole milliseconds
#[inline]
pub fn duration_millis(duration: Duration) -> Millis {
    duration.as_millis() as Millis
}
