/*!
 * Configure Report
 * Problems collected while applying a configuration
 */

use crate::core::{AppenderError, ConfigError, PatternError};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// One problem found while applying a configuration. None of these abort
/// the apply; affected monitors fall back to the default text appender.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Diagnostic)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigProblem {
    #[error("Appender '{name}' unavailable: {error}")]
    #[diagnostic(code(configure::appender))]
    Appender { name: String, error: AppenderError },

    #[error("Monitor '{monitor}' pattern '{pattern}' rejected: {error}")]
    #[diagnostic(code(configure::pattern))]
    Pattern {
        monitor: String,
        pattern: String,
        error: PatternError,
    },

    #[error("{0}")]
    #[diagnostic(code(configure::config))]
    Config(ConfigError),
}

/// Outcome of `PerfMon::configure`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigureReport {
    pub problems: Vec<ConfigProblem>,
    /// Monitors that fell back to the default text appender
    pub fallback_monitors: Vec<String>,
    pub appenders: usize,
    pub monitors: usize,
}

impl ConfigureReport {
    /// True when everything in the configuration was applied as written
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    pub(crate) fn push(&mut self, problem: ConfigProblem) {
        self.problems.push(problem);
    }
}
