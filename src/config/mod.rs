/*!
 * Configuration
 * Typed configuration model and environment-derived runtime flags
 */

mod flags;
mod types;

pub use flags::{
    RegistryLockStrategy, RuntimeFlags, TrackerMode, ENV_DISABLE_THREAD_TRACKER,
    ENV_LEGACY_REGISTRY_LOCK, ENV_SQL_TIME,
};
pub use types::{
    AppenderBinding, AppenderDefinition, AsyncQueueConfig, MedianConfig, MonitorDefinition,
    PerfMonConfig, ThreadTraceDefinition, ThresholdConfig,
};
