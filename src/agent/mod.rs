/*!
 * Agent
 * The PerfMon agent: registry, timers, appenders and configuration
 */

mod perfmon;
mod report;
mod tasks;

pub use perfmon::{PerfMon, DEFAULT_APPENDER_NAME};
pub use report::{ConfigProblem, ConfigureReport};
