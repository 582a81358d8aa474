/*!
 * Calculators
 * Threshold (percent-over) and median/percentile calculators fed per completion
 */

use crate::config::{MedianConfig, ThresholdConfig};
use serde::{Deserialize, Serialize};

// ============================================================================
// Threshold Calculator
// ============================================================================

/// Counts completions strictly over each configured threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdCalculator {
    thresholds: Vec<i64>,
    over: Vec<u64>,
    total: u64,
}

impl ThresholdCalculator {
    pub fn new(thresholds_millis: &[u64]) -> Self {
        let mut thresholds: Vec<i64> = thresholds_millis.iter().map(|t| *t as i64).collect();
        thresholds.sort_unstable();
        thresholds.dedup();
        let over = vec![0; thresholds.len()];
        Self {
            thresholds,
            over,
            total: 0,
        }
    }

    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self::new(&config.thresholds_millis)
    }

    /// Fresh calculator with the same thresholds and zeroed counts
    pub fn empty_clone(&self) -> Self {
        Self {
            thresholds: self.thresholds.clone(),
            over: vec![0; self.thresholds.len()],
            total: 0,
        }
    }

    pub fn put_value(&mut self, duration: i64) {
        self.total += 1;
        for (threshold, count) in self.thresholds.iter().zip(self.over.iter_mut()) {
            if duration > *threshold {
                *count += 1;
            }
        }
    }

    pub fn result(&self) -> Vec<ThresholdResult> {
        self.thresholds
            .iter()
            .zip(self.over.iter())
            .map(|(threshold, count)| ThresholdResult {
                threshold_millis: *threshold,
                count_over: *count,
                total_count: self.total,
                percent_over: if self.total > 0 {
                    (*count as f64 / self.total as f64) * 100.0
                } else {
                    0.0
                },
            })
            .collect()
    }
}

/// Completions over one threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub threshold_millis: i64,
    pub count_over: u64,
    pub total_count: u64,
    pub percent_over: f64,
}

// ============================================================================
// Median Calculator
// ============================================================================

/// Bounded-sample median and percentile calculator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedianCalculator {
    samples: Vec<i64>,
    max_elements: usize,
    factor: i64,
    overflow: u64,
}

impl MedianCalculator {
    pub fn new(max_elements: usize, factor: u32) -> Self {
        Self {
            samples: Vec::new(),
            max_elements: max_elements.max(1),
            factor: factor.max(1) as i64,
            overflow: 0,
        }
    }

    pub fn from_config(config: &MedianConfig) -> Self {
        Self::new(config.max_elements, config.factor)
    }

    /// Fresh calculator with the same settings and no samples
    pub fn empty_clone(&self) -> Self {
        Self::new(self.max_elements, self.factor as u32)
    }

    pub fn put_value(&mut self, duration: i64) {
        if self.samples.len() < self.max_elements {
            self.samples.push(duration / self.factor);
        } else {
            self.overflow += 1;
        }
    }

    /// Value at percentile `p` (0.0..=100.0), nearest-rank
    pub fn percentile(&self, p: f64) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let p = p.clamp(0.0, 100.0);
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = rank.saturating_sub(1).min(sorted.len() - 1);
        Some(sorted[index] * self.factor)
    }

    pub fn result(&self) -> MedianResult {
        let median = if self.samples.is_empty() {
            None
        } else {
            let mut sorted = self.samples.clone();
            sorted.sort_unstable();
            let mid = sorted.len() / 2;
            let value = if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
            } else {
                sorted[mid] as f64
            };
            Some(value * self.factor as f64)
        };

        MedianResult {
            median,
            p90: self.percentile(90.0),
            p99: self.percentile(99.0),
            sample_count: self.samples.len(),
            overflow_count: self.overflow,
        }
    }
}

/// Median calculation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianResult {
    pub median: Option<f64>,
    pub p90: Option<i64>,
    pub p99: Option<i64>,
    pub sample_count: usize,
    /// Samples counted but not retained; non-zero means the median is approximate
    pub overflow_count: u64,
}

impl MedianResult {
    pub fn is_approximate(&self) -> bool {
        self.overflow_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_strictly_over() {
        let mut calc = ThresholdCalculator::new(&[500, 100]);
        for d in [50, 100, 150, 600] {
            calc.put_value(d);
        }
        let result = calc.result();
        assert_eq!(result[0].threshold_millis, 100);
        assert_eq!(result[0].count_over, 2);
        assert_eq!(result[1].count_over, 1);
        assert!((result[1].percent_over - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_threshold_empty_clone() {
        let mut calc = ThresholdCalculator::new(&[10]);
        calc.put_value(20);
        let fresh = calc.empty_clone();
        assert_eq!(fresh.result()[0].count_over, 0);
    }

    #[test]
    fn test_median_odd_even() {
        let mut calc = MedianCalculator::new(100, 1);
        for d in [30, 10, 20] {
            calc.put_value(d);
        }
        assert_eq!(calc.result().median, Some(20.0));

        calc.put_value(40);
        assert_eq!(calc.result().median, Some(25.0));
    }

    #[test]
    fn test_median_overflow_flagged() {
        let mut calc = MedianCalculator::new(2, 1);
        for d in [1, 2, 3] {
            calc.put_value(d);
        }
        let result = calc.result();
        assert_eq!(result.sample_count, 2);
        assert!(result.is_approximate());
    }

    #[test]
    fn test_percentile() {
        let mut calc = MedianCalculator::new(1000, 1);
        for d in 1..=100 {
            calc.put_value(d);
        }
        assert_eq!(calc.percentile(90.0), Some(90));
        assert_eq!(calc.percentile(100.0), Some(100));
        assert_eq!(MedianCalculator::new(10, 1).percentile(50.0), None);
    }
}
