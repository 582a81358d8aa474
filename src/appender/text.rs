/*!
 * Text Appender
 * Human-readable interval reports written to the log or stdout
 */

use super::data::PerfMonData;
use super::traits::Appender;
use crate::config::AppenderDefinition;
use crate::core::{AppenderError, Millis};
use crate::monitor::IntervalData;
use crate::trace::{ThreadTraceData, TraceElement};
use serde::Deserialize;
use std::fmt::Write as _;
use std::io::Write as _;
use time::macros::format_description;
use time::OffsetDateTime;

const RULE: &str =
    "********************************************************************************";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextTarget {
    #[default]
    Log,
    Stdout,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextOptions {
    target: TextTarget,
}

/// Writes each payload as a framed text block
#[derive(Debug, Default)]
pub struct TextAppender {
    target: TextTarget,
}

impl TextAppender {
    pub fn new(target: TextTarget) -> Self {
        Self { target }
    }

    pub fn from_definition(definition: &AppenderDefinition) -> Result<Self, AppenderError> {
        let options: TextOptions = if definition.options.is_null() {
            TextOptions::default()
        } else {
            serde_json::from_value(definition.options.clone()).map_err(|e| {
                AppenderError::InvalidOptions {
                    name: definition.name.clone(),
                    reason: e.to_string(),
                }
            })?
        };
        Ok(Self::new(options.target))
    }

    pub fn render(data: &PerfMonData) -> String {
        match data {
            PerfMonData::Interval(interval) => render_interval(interval),
            PerfMonData::ThreadTrace(trace) => render_trace(trace),
            PerfMonData::SnapShot(snapshot) => {
                let mut out = String::new();
                let _ = writeln!(out, "{}", RULE);
                let _ = writeln!(out, "{} @ {}", snapshot.name, format_time(snapshot.timestamp));
                for value in &snapshot.values {
                    let _ = writeln!(out, " {:.<20} {}", value.name, value.value);
                }
                let _ = write!(out, "{}", RULE);
                out
            }
        }
    }
}

impl Appender for TextAppender {
    fn output_data(&self, data: &PerfMonData) -> Result<(), AppenderError> {
        let text = Self::render(data);
        match self.target {
            TextTarget::Log => {
                tracing::info!(target: "perfmon::text", "\n{}", text);
                Ok(())
            }
            TextTarget::Stdout => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{}", text).map_err(|e| AppenderError::Output(e.to_string()))
            }
        }
    }

    fn flush(&self) -> Result<(), AppenderError> {
        if self.target == TextTarget::Stdout {
            std::io::stdout()
                .flush()
                .map_err(|e| AppenderError::Output(e.to_string()))?;
        }
        Ok(())
    }
}

fn format_time(millis: Millis) -> String {
    let format = format_description!("[hour]:[minute]:[second]:[subsecond digits:3]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|t| t.format(format).ok())
        .unwrap_or_else(|| millis.to_string())
}

fn line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, " {:.<20} {}", label, value);
}

fn render_interval(data: &IntervalData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "{}", data.monitor_name());
    let _ = writeln!(out, "{} -> {}", format_time(data.start()), format_time(data.end()));

    let active_at = data
        .window()
        .time_max_active_threads()
        .map(|t| format!(" ({})", format_time(t)))
        .unwrap_or_default();
    line(&mut out, "Max Active Threads", format!("{}{}", data.max_active_threads(), active_at));
    line(
        &mut out,
        "Throughput",
        format!("{:.2} per minute", data.throughput_per_minute()),
    );
    line(&mut out, "Average Duration", format!("{:.2}", data.average_duration()));
    if let Some(median) = data.median().and_then(|m| m.median) {
        line(&mut out, "Median Duration", format!("{:.2}", median));
    }
    line(&mut out, "Standard Deviation", format!("{:.2}", data.std_deviation()));
    line(&mut out, "Max Duration", data.max_duration());
    line(&mut out, "Min Duration", data.min_duration());
    line(&mut out, "Total Hits", data.total_hits());
    line(&mut out, "Total Completions", data.total_completions());
    for threshold in data.thresholds().unwrap_or_default() {
        line(
            &mut out,
            &format!("> {} ms", threshold.threshold_millis),
            format!("{:.2}%", threshold.percent_over),
        );
    }
    if data.window().sql().total() > 0 {
        line(
            &mut out,
            "SQL Avg Duration",
            format!("{:.2}", data.window().average_sql_duration()),
        );
        line(&mut out, "SQL Max Duration", data.window().sql().max());
    }
    let _ = write!(out, "{}", RULE);
    out
}

fn render_trace(data: &ThreadTraceData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "Thread trace on {}",
        data.thread_name.as_deref().unwrap_or("<unnamed>")
    );
    if data.overflow {
        let _ = writeln!(out, "(element limit reached, trace truncated)");
    }
    render_element(&mut out, &data.root, 0);
    let _ = write!(out, "{}", RULE);
    out
}

fn render_element(out: &mut String, element: &TraceElement, depth: usize) {
    let _ = writeln!(
        out,
        "{:indent$}+-{} {} ({} ms)",
        "",
        format_time(element.start),
        element.name,
        element.duration(),
        indent = depth * 2
    );
    for child in &element.children {
        render_element(out, child, depth + 1);
    }
}
