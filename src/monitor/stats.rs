/*!
 * Statistics Accumulator
 * Running aggregates for one monitor over one window (or over its lifetime)
 */

use crate::core::limits::NOT_SET;
use crate::core::Millis;
use serde::{Deserialize, Serialize};

/// Duration aggregates with min/max timestamps
///
/// Min and max hold `NOT_SET` until the first completion; getters mask it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationStats {
    total: i64,
    sum_of_squares: u64,
    max: i64,
    time_max: Millis,
    min: i64,
    time_min: Millis,
}

impl Default for DurationStats {
    fn default() -> Self {
        Self {
            total: 0,
            sum_of_squares: 0,
            max: NOT_SET,
            time_max: NOT_SET,
            min: NOT_SET,
            time_min: NOT_SET,
        }
    }
}

impl DurationStats {
    /// Fold one duration; ties go to the most recent event
    #[inline]
    pub fn record(&mut self, duration: i64, now: Millis) {
        self.total = self.total.saturating_add(duration);
        self.sum_of_squares = self
            .sum_of_squares
            .saturating_add((duration as u64).saturating_mul(duration as u64));

        if duration >= self.max {
            self.max = duration;
            self.time_max = now;
        }
        if self.min == NOT_SET || duration <= self.min {
            self.min = duration;
            self.time_min = now;
        }
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn sum_of_squares(&self) -> u64 {
        self.sum_of_squares
    }

    pub fn max(&self) -> i64 {
        mask(self.max)
    }

    pub fn min(&self) -> i64 {
        mask(self.min)
    }

    pub fn time_max(&self) -> Option<Millis> {
        (self.time_max != NOT_SET).then_some(self.time_max)
    }

    pub fn time_min(&self) -> Option<Millis> {
        (self.time_min != NOT_SET).then_some(self.time_min)
    }

    /// Sample standard deviation over `count` events
    pub fn std_deviation(&self, count: u64) -> f64 {
        if count < 2 {
            return 0.0;
        }
        let n = count as f64;
        let total = self.total as f64;
        let variance = (self.sum_of_squares as f64 - (total * total) / n) / (n - 1.0);
        if variance > 0.0 {
            variance.sqrt()
        } else {
            0.0
        }
    }
}

#[inline]
fn mask(value: i64) -> i64 {
    if value == NOT_SET {
        0
    } else {
        value
    }
}

/// Hit/completion/duration/concurrency aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    total_hits: u64,
    total_completions: u64,
    duration: DurationStats,
    sql_duration: DurationStats,
    max_active_threads: u32,
    time_max_active_threads: Option<Millis>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outermost entry of a thread into the monitor
    #[inline]
    pub fn record_start(&mut self, active_threads: u32, now: Millis) {
        self.total_hits += 1;
        if active_threads >= self.max_active_threads {
            self.max_active_threads = active_threads;
            self.time_max_active_threads = Some(now);
        }
    }

    /// Outermost non-aborted exit
    #[inline]
    pub fn record_stop(&mut self, duration: i64, sql_duration: Option<i64>, now: Millis) {
        self.total_completions += 1;
        self.duration.record(duration, now);
        if let Some(sql) = sql_duration {
            self.sql_duration.record(sql, now);
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn total_completions(&self) -> u64 {
        self.total_completions
    }

    pub fn total_duration(&self) -> i64 {
        self.duration.total()
    }

    pub fn sum_of_squares(&self) -> u64 {
        self.duration.sum_of_squares()
    }

    pub fn max_duration(&self) -> i64 {
        self.duration.max()
    }

    pub fn min_duration(&self) -> i64 {
        self.duration.min()
    }

    pub fn time_max_duration(&self) -> Option<Millis> {
        self.duration.time_max()
    }

    pub fn time_min_duration(&self) -> Option<Millis> {
        self.duration.time_min()
    }

    pub fn average_duration(&self) -> f64 {
        if self.total_completions == 0 {
            0.0
        } else {
            self.duration.total() as f64 / self.total_completions as f64
        }
    }

    pub fn std_deviation(&self) -> f64 {
        self.duration.std_deviation(self.total_completions)
    }

    pub fn max_active_threads(&self) -> u32 {
        self.max_active_threads
    }

    pub fn time_max_active_threads(&self) -> Option<Millis> {
        self.time_max_active_threads
    }

    pub fn sql(&self) -> &DurationStats {
        &self.sql_duration
    }

    pub fn average_sql_duration(&self) -> f64 {
        if self.total_completions == 0 {
            0.0
        } else {
            self.sql_duration.total() as f64 / self.total_completions as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_hits == 0 && self.total_completions == 0
    }
}

/// Highest per-minute throughput observed across reported windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputRecord {
    pub per_minute: f64,
    pub window_start: Millis,
    pub window_end: Millis,
}

/// Completions per minute over a window
pub fn throughput_per_minute(completions: u64, start: Millis, end: Millis) -> f64 {
    let span = (end - start).max(1) as f64;
    completions as f64 * 60_000.0 / span
}
