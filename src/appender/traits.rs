/*!
 * Appender Trait
 * Contract between the dispatch core and output sinks
 */

use super::data::PerfMonData;
use crate::core::AppenderError;

/// Output sink for interval snapshots, thread traces and snapshot data
///
/// The core never calls `output_data` concurrently for the same
/// (appender, monitor, window), and only from timer threads.
#[cfg_attr(test, mockall::automock)]
pub trait Appender: Send + Sync {
    fn output_data(&self, data: &PerfMonData) -> Result<(), AppenderError>;

    /// Flush any buffering in the underlying sink
    fn flush(&self) -> Result<(), AppenderError> {
        Ok(())
    }
}
