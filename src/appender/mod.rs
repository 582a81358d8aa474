/*!
 * Appenders
 * Output sinks, their dispatch handles, and monitor-to-appender mapping
 */

mod data;
mod factory;
mod handle;
mod json_lines;
mod mapper;
mod memory;
mod pattern;
mod push_task;
mod text;
mod traits;

pub use data::{PerfMonData, SnapShotData, SnapShotValue};
pub use factory::{
    AppenderConstructor, AppenderFactory, JSON_LINES_APPENDER, MEMORY_APPENDER, TEXT_APPENDER,
};
pub use handle::{AppenderHandle, AppenderStats};
pub use json_lines::JsonLinesAppender;
pub use mapper::{AppenderPatternMapper, AppenderPatternMapperBuilder};
pub use memory::MemoryAppender;
pub use pattern::{qualified_name, AppenderPattern};
pub use text::{TextAppender, TextTarget};
pub use traits::Appender;

#[cfg(test)]
pub use traits::MockAppender;

pub(crate) use push_task::{DeliverDataTask, PushAppenderDataTask};
