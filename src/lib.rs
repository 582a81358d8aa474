/*!
 * PerfMon Core Library
 *
 * In-process performance monitoring: hierarchical monitors with windowed
 * statistics, pattern-routed appenders fed by background timers, and nested
 * per-thread traces.
 */

pub mod agent;
pub mod appender;
pub mod config;
pub mod core;
pub mod logging;
pub mod monitor;
pub mod scheduler;
pub mod trace;

// Re-exports
pub use agent::{ConfigProblem, ConfigureReport, PerfMon};
pub use appender::{Appender, AppenderFactory, AppenderHandle, AppenderPatternMapper, PerfMonData};
pub use config::{
    AppenderDefinition, MonitorDefinition, PerfMonConfig, RuntimeFlags, ThreadTraceDefinition,
};
pub use crate::core::{AppenderError, ConfigError, PatternError, PerfMonError, Result};
pub use logging::init_tracing;
pub use monitor::{IntervalData, MonitorNode, MonitorRegistry, PerfMonTimer};
pub use scheduler::round_interval;
pub use trace::{ThreadTraceConfig, ThreadTraceData, TraceTrigger};
