/*!
 * Monitors
 * Hierarchical monitor nodes, their statistics, and concurrency tracking
 */

mod calculators;
mod interval;
mod node;
mod registry;
pub mod sql_time;
mod stats;
mod timer;
mod tracker;

pub use calculators::{MedianCalculator, MedianResult, ThresholdCalculator, ThresholdResult};
pub use interval::IntervalData;
pub use node::{
    ActiveThreadReport, ExternalElementId, LongestRunning, MonitorNode, MonitorSettings,
    ThresholdCount,
};
pub use registry::{validate_name, CreationHook, MonitorRegistry};
pub use stats::{throughput_per_minute, Accumulator, DurationStats, ThroughputRecord};
pub use timer::PerfMonTimer;
pub use tracker::{RunningThread, ThreadConcurrencyTracker};

pub(crate) use node::TraceBinding;
