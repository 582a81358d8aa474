/*!
 * Runtime Flags
 *
 * Process-level switches read once from the environment. Also constructible
 * directly so tests can inject a strategy without touching the environment.
 */

use serde::{Deserialize, Serialize};

/// Disables per-thread list maintenance in concurrency trackers
pub const ENV_DISABLE_THREAD_TRACKER: &str = "PERFMON_DISABLE_THREAD_TRACKER";

/// Falls back to a single exclusive lock for the monitor registry
pub const ENV_LEGACY_REGISTRY_LOCK: &str = "PERFMON_LEGACY_REGISTRY_LOCK";

/// Enables SQL duration bookkeeping
pub const ENV_SQL_TIME: &str = "PERFMON_SQL_TIME";

/// Locking strategy for the monitor registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryLockStrategy {
    /// Reader concurrency for lookups, exclusive only on creation
    ReadWrite,
    /// Single mutex for every access (diagnosing lock regressions)
    Exclusive,
}

/// Thread concurrency tracking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerMode {
    /// Maintain the ordered list of running threads
    Full,
    /// Plain counter, no per-thread bookkeeping
    CountOnly,
}

/// Runtime flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFlags {
    pub registry_lock: RegistryLockStrategy,
    pub tracker_mode: TrackerMode,
    pub sql_time_enabled: bool,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            registry_lock: RegistryLockStrategy::ReadWrite,
            tracker_mode: TrackerMode::Full,
            sql_time_enabled: false,
        }
    }
}

impl RuntimeFlags {
    /// Read flags from the environment
    pub fn from_env() -> Self {
        let registry_lock = if env_flag(ENV_LEGACY_REGISTRY_LOCK) {
            RegistryLockStrategy::Exclusive
        } else {
            RegistryLockStrategy::ReadWrite
        };

        let tracker_mode = if env_flag(ENV_DISABLE_THREAD_TRACKER) {
            TrackerMode::CountOnly
        } else {
            TrackerMode::Full
        };

        Self {
            registry_lock,
            tracker_mode,
            sql_time_enabled: env_flag(ENV_SQL_TIME),
        }
    }

    pub fn with_registry_lock(mut self, strategy: RegistryLockStrategy) -> Self {
        self.registry_lock = strategy;
        self
    }

    pub fn with_tracker_mode(mut self, mode: TrackerMode) -> Self {
        self.tracker_mode = mode;
        self
    }

    pub fn with_sql_time(mut self, enabled: bool) -> Self {
        self.sql_time_enabled = enabled;
        self
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
