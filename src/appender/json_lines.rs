/*!
 * JSON Lines Appender
 *
 * Appends one JSON document per payload to a file. When the file cannot be
 * opened or written, the appender waits out a cooldown before trying again;
 * output during the cooldown is silently discarded.
 */

use super::data::PerfMonData;
use super::traits::Appender;
use crate::config::AppenderDefinition;
use crate::core::limits::DEFAULT_RECONNECT_COOLDOWN;
use crate::core::AppenderError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct JsonLinesOptions {
    path: PathBuf,
    #[serde(default)]
    reconnect_cooldown_secs: Option<u64>,
}

#[derive(Debug, Default)]
struct WriterState {
    writer: Option<BufWriter<File>>,
    retry_after: Option<Instant>,
}

#[derive(Debug)]
pub struct JsonLinesAppender {
    path: PathBuf,
    cooldown: Duration,
    state: Mutex<WriterState>,
}

impl JsonLinesAppender {
    pub fn new(path: impl Into<PathBuf>, cooldown: Duration) -> Self {
        Self {
            path: path.into(),
            cooldown,
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn from_definition(definition: &AppenderDefinition) -> Result<Self, AppenderError> {
        let options: JsonLinesOptions = serde_json::from_value(definition.options.clone())
            .map_err(|e| AppenderError::InvalidOptions {
                name: definition.name.clone(),
                reason: e.to_string(),
            })?;
        let cooldown = options
            .reconnect_cooldown_secs
            .map_or(DEFAULT_RECONNECT_COOLDOWN, Duration::from_secs);
        Ok(Self::new(options.path, cooldown))
    }

    fn fail(&self, state: &mut WriterState, reason: String) -> AppenderError {
        state.writer = None;
        state.retry_after = Some(Instant::now() + self.cooldown);
        warn!(
            path = %self.path.display(),
            cooldown_secs = self.cooldown.as_secs(),
            error = %reason,
            "JSON lines appender unavailable, retrying after cooldown"
        );
        AppenderError::Output(reason)
    }
}

impl Appender for JsonLinesAppender {
    fn output_data(&self, data: &PerfMonData) -> Result<(), AppenderError> {
        let mut state = self.state.lock();

        if state.writer.is_none() {
            if state.retry_after.is_some_and(|at| Instant::now() < at) {
                return Ok(());
            }
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => {
                    info!(path = %self.path.display(), "JSON lines appender opened");
                    state.writer = Some(BufWriter::new(file));
                    state.retry_after = None;
                }
                Err(e) => return Err(self.fail(&mut state, e.to_string())),
            }
        }

        let written = match state.writer.as_mut() {
            Some(writer) => serde_json::to_writer(&mut *writer, data)
                .map_err(|e| e.to_string())
                .and_then(|()| writer.write_all(b"\n").map_err(|e| e.to_string())),
            None => Ok(()),
        };
        written.map_err(|reason| self.fail(&mut state, reason))
    }

    fn flush(&self) -> Result<(), AppenderError> {
        let mut state = self.state.lock();
        let flushed = match state.writer.as_mut() {
            Some(writer) => writer.flush().map_err(|e| e.to_string()),
            None => Ok(()),
        };
        flushed.map_err(|reason| self.fail(&mut state, reason))
    }
}
