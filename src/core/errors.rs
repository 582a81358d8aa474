/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Appender pattern errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PatternError {
    #[error("Empty appender pattern")]
    #[diagnostic(
        code(pattern::empty),
        help("Use one of '.', '/*', './*', '/**', './**' or a custom '/name*' expression.")
    )]
    Empty,

    #[error("Invalid appender pattern '{0}'")]
    #[diagnostic(
        code(pattern::invalid),
        help("Custom patterns must start with '/' or './' and may only use name characters, '*', '?' and '/'.")
    )]
    Invalid(String),

    #[error("Pattern '{pattern}' failed to compile: {reason}")]
    #[diagnostic(code(pattern::compile_failed))]
    Compile { pattern: String, reason: String },
}

/// Appender lifecycle and output errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AppenderError {
    #[error("Unknown appender type '{0}'")]
    #[diagnostic(
        code(appender::unknown_type),
        help("Register a factory for this type tag before calling configure.")
    )]
    UnknownType(String),

    #[error("Invalid options for appender '{name}': {reason}")]
    #[diagnostic(
        code(appender::invalid_options),
        help("Check the appender's options object against its documented fields.")
    )]
    InvalidOptions { name: String, reason: String },

    #[error("Appender '{0}' not found")]
    #[diagnostic(code(appender::not_found))]
    NotFound(String),

    #[error("Monitor already has the maximum of {0} appenders")]
    #[diagnostic(
        code(appender::limit_reached),
        help("Reduce the number of patterns matching this monitor.")
    )]
    LimitReached(usize),

    #[error("Appender output failed: {0}")]
    #[diagnostic(code(appender::output_failed))]
    Output(String),
}

/// Configuration errors reported by configure
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Invalid monitor name '{0}'")]
    #[diagnostic(
        code(config::invalid_monitor_name),
        help("Monitor names are dot separated and may not contain empty segments.")
    )]
    InvalidMonitorName(String),

    #[error("Monitor '{monitor}' references undefined appender '{appender}'")]
    #[diagnostic(code(config::undefined_appender))]
    UndefinedAppender { monitor: String, appender: String },

    #[error("Failed to read configuration: {0}")]
    #[diagnostic(code(config::read_failed))]
    Read(String),
}

/// Unified error type
#[derive(Error, Debug, Diagnostic)]
pub enum PerfMonError {
    #[error("Pattern error: {0}")]
    #[diagnostic(transparent)]
    Pattern(#[from] PatternError),

    #[error("Appender error: {0}")]
    #[diagnostic(transparent)]
    Appender(#[from] AppenderError),

    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("External element limit of {0} reached")]
    #[diagnostic(
        code(perfmon::external_limit),
        help("Remove unused external elements before adding new ones.")
    )]
    ExternalLimitReached(usize),

    #[error("Timer '{0}' is shut down")]
    #[diagnostic(code(perfmon::timer_shutdown))]
    TimerShutdown(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(perfmon::io_error),
        help("Filesystem or I/O operation failed. Check file permissions and disk space.")
    )]
    Io(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(perfmon::internal_error))]
    Internal(String),
}

impl From<std::io::Error> for PerfMonError {
    fn from(err: std::io::Error) -> Self {
        PerfMonError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PerfMonError {
    fn from(err: serde_json::Error) -> Self {
        PerfMonError::Config(ConfigError::Read(err.to_string()))
    }
}

impl From<String> for PerfMonError {
    fn from(msg: String) -> Self {
        PerfMonError::Internal(msg)
    }
}

impl From<&str> for PerfMonError {
    fn from(msg: &str) -> Self {
        PerfMonError::Internal(msg.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T, E = PerfMonError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PerfMonError::from(AppenderError::UnknownType("jdbc".to_string()));
        assert_eq!(err.to_string(), "Appender error: Unknown appender type 'jdbc'");
    }

    #[test]
    fn test_pattern_error_serialization() {
        let err = PatternError::Invalid("/a b".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("invalid"));
        let back: PatternError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PerfMonError = io.into();
        assert!(matches!(err, PerfMonError::Io(_)));
    }
}
