/*!
 * SQL Time
 *
 * Thread-local running total of time spent in SQL calls. Database wrappers
 * call `record` after each statement; monitors read `current` at the start
 * and end of an event and attribute the difference as SQL duration.
 */

use std::cell::Cell;

thread_local! {
    static SQL_MILLIS: Cell<i64> = const { Cell::new(0) };
}

/// Add `millis` of SQL time to the current thread
#[inline]
pub fn record(millis: i64) {
    SQL_MILLIS.with(|total| total.set(total.get().saturating_add(millis.max(0))));
}

/// Cumulative SQL time of the current thread
#[inline]
pub fn current() -> i64 {
    SQL_MILLIS.with(Cell::get)
}
