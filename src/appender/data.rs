/*!
 * Appender Data
 * Payloads delivered to appenders
 */

use crate::core::Millis;
use crate::monitor::IntervalData;
use crate::trace::ThreadTraceData;
use serde::{Deserialize, Serialize};

/// Anything an appender can receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PerfMonData {
    Interval(IntervalData),
    ThreadTrace(ThreadTraceData),
    SnapShot(SnapShotData),
}

impl PerfMonData {
    /// Name of the monitor (or snapshot source) the data belongs to
    pub fn source_name(&self) -> &str {
        match self {
            PerfMonData::Interval(data) => data.monitor_name(),
            PerfMonData::ThreadTrace(data) => data.monitor_name(),
            PerfMonData::SnapShot(data) => &data.name,
        }
    }

    pub fn as_interval(&self) -> Option<&IntervalData> {
        match self {
            PerfMonData::Interval(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_thread_trace(&self) -> Option<&ThreadTraceData> {
        match self {
            PerfMonData::ThreadTrace(data) => Some(data),
            _ => None,
        }
    }
}

/// Point-in-time values produced by snapshot monitors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapShotData {
    pub name: String,
    pub timestamp: Millis,
    pub values: Vec<SnapShotValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapShotValue {
    pub name: String,
    pub value: f64,
}

impl SnapShotData {
    pub fn new(name: &str, timestamp: Millis) -> Self {
        Self {
            name: name.to_string(),
            timestamp,
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.push(SnapShotValue {
            name: name.to_string(),
            value,
        });
        self
    }
}
