/*!
 * Interval Rounding
 *
 * Aligns recurring firings to wall-clock boundaries so that every monitor's
 * one-minute appender fires at nearly the same moment.
 */

use crate::core::Millis;
use std::time::Duration;

/// Delay until the next firing of a task with period `interval`, given the
/// current wall-clock time `now`.
///
/// Whole-second intervals snap to the next multiple of `interval`; a firing
/// closer than half an interval is pushed out one more period, so the delay
/// always lies in `[interval / 2, 1.5 * interval)`. Sub-second or fractional
/// intervals are returned unchanged.
pub fn round_interval(now: Millis, interval: Duration) -> Duration {
    let interval_millis = interval.as_millis() as i64;
    if interval_millis <= 0 || interval_millis % 1000 != 0 {
        return interval;
    }

    let remainder = now.rem_euclid(interval_millis);
    let mut delay = interval_millis - remainder;
    if delay < interval_millis / 2 {
        delay += interval_millis;
    }
    Duration::from_millis(delay as u64)
}
