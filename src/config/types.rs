/*!
 * Configuration Model
 *
 * In-memory description of appenders, monitors and thread traces consumed by
 * `PerfMon::configure`. Textual formats are parsed by the caller; the demo
 * binary reads this model from JSON.
 */

use crate::core::limits::{
    DEFAULT_APPENDER_INTERVAL, DEFAULT_ASYNC_FLUSH_INTERVAL, DEFAULT_ASYNC_QUEUE_CAPACITY,
    DEFAULT_MEDIAN_MAX_ELEMENTS,
};
use crate::core::{ConfigError, Result};
use crate::trace::ThreadTraceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfMonConfig {
    #[serde(default)]
    pub appenders: Vec<AppenderDefinition>,
    #[serde(default)]
    pub monitors: Vec<MonitorDefinition>,
    #[serde(default)]
    pub thread_traces: Vec<ThreadTraceDefinition>,
}

impl PerfMonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_appender(mut self, appender: AppenderDefinition) -> Self {
        self.appenders.push(appender);
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorDefinition) -> Self {
        self.monitors.push(monitor);
        self
    }

    pub fn with_thread_trace(mut self, monitor: &str, config: ThreadTraceConfig) -> Self {
        self.thread_traces.push(ThreadTraceDefinition {
            monitor: monitor.to_string(),
            config,
        });
        self
    }

    /// Find an appender definition by name
    pub fn appender(&self, name: &str) -> Option<&AppenderDefinition> {
        self.appenders.iter().find(|a| a.name == name)
    }
}

/// Appender declaration: a type tag plus typed options interpreted by the
/// factory registered for that tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppenderDefinition {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_interval_millis")]
    pub interval_millis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_queue: Option<AsyncQueueConfig>,
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_interval_millis() -> u64 {
    DEFAULT_APPENDER_INTERVAL.as_millis() as u64
}

impl AppenderDefinition {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            interval_millis: default_interval_millis(),
            async_queue: None,
            options: serde_json::Value::Null,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_millis = interval.as_millis() as u64;
        self
    }

    pub fn with_async_queue(mut self, queue: AsyncQueueConfig) -> Self {
        self.async_queue = Some(queue);
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis.max(1))
    }
}

/// Bounded async delivery settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncQueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_flush_millis")]
    pub flush_interval_millis: u64,
}

fn default_queue_capacity() -> usize {
    DEFAULT_ASYNC_QUEUE_CAPACITY
}

fn default_flush_millis() -> u64 {
    DEFAULT_ASYNC_FLUSH_INTERVAL.as_millis() as u64
}

impl Default for AsyncQueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            flush_interval_millis: default_flush_millis(),
        }
    }
}

/// Monitor declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorDefinition {
    pub name: String,
    #[serde(default)]
    pub appenders: Vec<AppenderBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ThresholdConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median: Option<MedianConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_thread_thresholds: Option<Vec<u64>>,
}

impl MonitorDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_appender(mut self, appender: &str, pattern: &str) -> Self {
        self.appenders.push(AppenderBinding {
            appender: appender.to_string(),
            pattern: pattern.to_string(),
        });
        self
    }

    pub fn with_thresholds(mut self, thresholds_millis: Vec<u64>) -> Self {
        self.thresholds = Some(ThresholdConfig { thresholds_millis });
        self
    }

    pub fn with_median(mut self, median: MedianConfig) -> Self {
        self.median = Some(median);
        self
    }

    pub fn with_active_thread_thresholds(mut self, thresholds_millis: Vec<u64>) -> Self {
        self.active_thread_thresholds = Some(thresholds_millis);
        self
    }
}

/// Association of an appender with a pattern relative to a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppenderBinding {
    pub appender: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    ".".to_string()
}

/// Duration thresholds for percent-over reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub thresholds_millis: Vec<u64>,
}

/// Median / percentile calculation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianConfig {
    #[serde(default = "default_median_elements")]
    pub max_elements: usize,
    /// Divisor applied to durations before sampling (1 = exact millis)
    #[serde(default = "default_median_factor")]
    pub factor: u32,
}

fn default_median_elements() -> usize {
    DEFAULT_MEDIAN_MAX_ELEMENTS
}

fn default_median_factor() -> u32 {
    1
}

impl Default for MedianConfig {
    fn default() -> Self {
        Self {
            max_elements: default_median_elements(),
            factor: default_median_factor(),
        }
    }
}

/// Thread trace attached to a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadTraceDefinition {
    pub monitor: String,
    #[serde(flatten)]
    pub config: ThreadTraceConfig,
}
