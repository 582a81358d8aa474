/*!
 * Memory Appender
 * Bounded in-process buffer for inspection and tests
 */

use super::data::PerfMonData;
use super::traits::Appender;
use crate::config::AppenderDefinition;
use crate::core::limits::DEFAULT_MEMORY_APPENDER_CAPACITY;
use crate::core::AppenderError;
use crate::monitor::IntervalData;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MemoryOptions {
    capacity: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_APPENDER_CAPACITY,
        }
    }
}

/// Keeps the most recent `capacity` payloads; older ones are evicted
#[derive(Debug)]
pub struct MemoryAppender {
    capacity: usize,
    buffer: Mutex<VecDeque<PerfMonData>>,
}

impl Default for MemoryAppender {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_APPENDER_CAPACITY)
    }
}

impl MemoryAppender {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    pub fn from_definition(definition: &AppenderDefinition) -> Result<Self, AppenderError> {
        let options: MemoryOptions = if definition.options.is_null() {
            MemoryOptions::default()
        } else {
            serde_json::from_value(definition.options.clone()).map_err(|e| {
                AppenderError::InvalidOptions {
                    name: definition.name.clone(),
                    reason: e.to_string(),
                }
            })?
        };
        Ok(Self::new(options.capacity))
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Copy of everything currently buffered, oldest first
    pub fn snapshot(&self) -> Vec<PerfMonData> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Remove and return everything buffered
    pub fn take_all(&self) -> Vec<PerfMonData> {
        self.buffer.lock().drain(..).collect()
    }

    /// Buffered interval snapshots for one monitor
    pub fn intervals_for(&self, monitor: &str) -> Vec<IntervalData> {
        self.buffer
            .lock()
            .iter()
            .filter_map(PerfMonData::as_interval)
            .filter(|data| data.monitor_name() == monitor)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Appender for MemoryAppender {
    fn output_data(&self, data: &PerfMonData) -> Result<(), AppenderError> {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::data::SnapShotData;

    #[test]
    fn test_evicts_oldest() {
        let appender = MemoryAppender::new(2);
        for name in ["a", "b", "c"] {
            appender
                .output_data(&PerfMonData::SnapShot(SnapShotData::new(name, 0)))
                .unwrap();
        }

        let names: Vec<String> = appender
            .snapshot()
            .iter()
            .map(|d| d.source_name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(appender.take_all().len(), 2);
        assert!(appender.is_empty());
    }

    #[test]
    fn test_capacity_option() {
        let definition = AppenderDefinition::new("mem", "memory")
            .with_options(serde_json::json!({ "capacity": 5 }));
        let appender = MemoryAppender::from_definition(&definition).unwrap();
        assert_eq!(appender.capacity, 5);
    }
}
