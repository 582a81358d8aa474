/*!
 * Logging
 * tracing-subscriber setup for binaries and test harnesses embedding the agent
 */

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting JSON log output
pub const ENV_TRACE_JSON: &str = "PERFMON_TRACE_JSON";

/// Initialize structured logging
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - PERFMON_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling this more than once is harmless; only the first subscriber wins.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(ENV_TRACE_JSON)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured logging initialized");
    }
}
