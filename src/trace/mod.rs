/*!
 * Thread Traces
 * Nested per-thread checkpoint capture rooted at configured monitors
 */

mod config;
mod data;
mod engine;

pub use config::{
    with_trigger_context, ThreadTraceConfig, TraceTrigger, TriggerContext, TriggerCounts,
};
pub use data::{ThreadTraceData, TraceElement, UniqueTraceKey};
pub use engine::{has_active_traces, TraceCategory};

pub(crate) use engine::{enter_checkpoint, exit_checkpoint, start_trace, TraceSink, TraceStart};
