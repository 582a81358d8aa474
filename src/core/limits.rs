/*!
 * Limits and Constants
 *
 * Centralized location for monitor, appender and thread-trace limits.
 * Organized by domain for discoverability.
 */

use std::time::Duration;

// =============================================================================
// MONITOR LIMITS
// =============================================================================

/// Name of the implicit root of the monitor hierarchy
pub const ROOT_MONITOR_NAME: &str = "<ROOT>";

/// Maximum appenders attached to a single monitor
pub const MAX_APPENDERS_PER_MONITOR: usize = 10;

/// Maximum external-consumer interval slots attached to a single monitor
pub const MAX_EXTERNAL_ELEMENTS_PER_MONITOR: usize = 10;

/// Sentinel for "no event recorded yet" in min/max fields
pub const NOT_SET: i64 = -1;

// =============================================================================
// APPENDER LIMITS
// =============================================================================

/// Default reporting interval for appenders (1 minute)
pub const DEFAULT_APPENDER_INTERVAL: Duration = Duration::from_secs(60);

/// Default capacity of an async appender queue
/// Newest events are dropped once full
pub const DEFAULT_ASYNC_QUEUE_CAPACITY: usize = 1_000;

/// Default period of the async appender flush timer
pub const DEFAULT_ASYNC_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cooldown before an appender retries a failed connection (5 minutes)
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Bounded buffer length for the in-memory appender
pub const DEFAULT_MEMORY_APPENDER_CAPACITY: usize = 1_000;

// =============================================================================
// THREAD TRACE LIMITS
// =============================================================================

/// Maximum materialized checkpoints for internal (configured) traces
pub const MAX_INTERNAL_TRACE_ELEMENTS: usize = 100_000;

/// Maximum materialized checkpoints for external (remote inspection) traces
pub const MAX_EXTERNAL_TRACE_ELEMENTS: usize = 2_500;

/// How long a pending external trace request waits for a matching start
pub const EXTERNAL_TRACE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Period of the utility-timer task that expires stale external trace requests
pub const EXTERNAL_TRACE_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// CALCULATOR LIMITS
// =============================================================================

/// Default sample capacity of a median calculator
pub const DEFAULT_MEDIAN_MAX_ELEMENTS: usize = 1_000;
