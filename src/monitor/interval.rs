/*!
 * Interval Data
 *
 * `LiveInterval` accumulates one open window for one consumer (an appender or
 * an external element). `finish` turns it into an immutable `IntervalData`
 * that also carries the monitor's lifetime numbers as of that moment.
 */

use super::calculators::{MedianCalculator, MedianResult, ThresholdCalculator, ThresholdResult};
use super::stats::{throughput_per_minute, Accumulator, ThroughputRecord};
use crate::core::Millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Open window for one consumer
#[derive(Debug, Clone)]
pub(crate) struct LiveInterval {
    start: Millis,
    stats: Accumulator,
    threshold: Option<ThresholdCalculator>,
    median: Option<MedianCalculator>,
}

impl LiveInterval {
    pub(crate) fn new(
        start: Millis,
        threshold: Option<&ThresholdCalculator>,
        median: Option<&MedianCalculator>,
    ) -> Self {
        Self {
            start,
            stats: Accumulator::new(),
            threshold: threshold.map(ThresholdCalculator::empty_clone),
            median: median.map(MedianCalculator::empty_clone),
        }
    }

    pub(crate) fn start(&self) -> Millis {
        self.start
    }

    pub(crate) fn stats(&self) -> &Accumulator {
        &self.stats
    }

    #[inline]
    pub(crate) fn record_start(&mut self, active_threads: u32, now: Millis) {
        self.stats.record_start(active_threads, now);
    }

    #[inline]
    pub(crate) fn record_stop(&mut self, duration: i64, sql_duration: Option<i64>, now: Millis) {
        self.stats.record_stop(duration, sql_duration, now);
        if let Some(threshold) = self.threshold.as_mut() {
            threshold.put_value(duration);
        }
        if let Some(median) = self.median.as_mut() {
            median.put_value(duration);
        }
    }

    /// Close the window and produce the immutable snapshot
    pub(crate) fn finish(
        self,
        monitor_name: Arc<str>,
        end: Millis,
        lifetime: Accumulator,
        lifetime_start: Millis,
        max_throughput: Option<ThroughputRecord>,
    ) -> IntervalData {
        IntervalData {
            monitor_name,
            start: self.start,
            end,
            window: self.stats,
            lifetime,
            lifetime_start,
            max_throughput,
            thresholds: self.threshold.map(|t| t.result()),
            median: self.median.map(|m| m.result()),
        }
    }
}

/// Immutable snapshot of one monitor over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalData {
    monitor_name: Arc<str>,
    start: Millis,
    end: Millis,
    window: Accumulator,
    lifetime: Accumulator,
    lifetime_start: Millis,
    max_throughput: Option<ThroughputRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thresholds: Option<Vec<ThresholdResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    median: Option<MedianResult>,
}

impl IntervalData {
    pub fn monitor_name(&self) -> &str {
        &self.monitor_name
    }

    pub fn start(&self) -> Millis {
        self.start
    }

    pub fn end(&self) -> Millis {
        self.end
    }

    /// Window aggregates
    pub fn window(&self) -> &Accumulator {
        &self.window
    }

    /// Life-of-monitor aggregates captured when the window closed
    pub fn lifetime(&self) -> &Accumulator {
        &self.lifetime
    }

    pub fn lifetime_start(&self) -> Millis {
        self.lifetime_start
    }

    pub fn total_hits(&self) -> u64 {
        self.window.total_hits()
    }

    pub fn total_completions(&self) -> u64 {
        self.window.total_completions()
    }

    pub fn total_duration(&self) -> i64 {
        self.window.total_duration()
    }

    pub fn min_duration(&self) -> i64 {
        self.window.min_duration()
    }

    pub fn max_duration(&self) -> i64 {
        self.window.max_duration()
    }

    pub fn average_duration(&self) -> f64 {
        self.window.average_duration()
    }

    pub fn std_deviation(&self) -> f64 {
        self.window.std_deviation()
    }

    pub fn max_active_threads(&self) -> u32 {
        self.window.max_active_threads()
    }

    pub fn throughput_per_minute(&self) -> f64 {
        throughput_per_minute(self.window.total_completions(), self.start, self.end)
    }

    pub fn max_throughput(&self) -> Option<&ThroughputRecord> {
        self.max_throughput.as_ref()
    }

    pub fn thresholds(&self) -> Option<&[ThresholdResult]> {
        self.thresholds.as_deref()
    }

    pub fn median(&self) -> Option<&MedianResult> {
        self.median.as_ref()
    }
}
