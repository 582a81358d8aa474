/*!
 * Thread Trace Engine
 *
 * Per-thread set of active traces, split into internal (configured on a
 * monitor) and external (one-shot remote requests) categories with separate
 * element limits. Every monitor entered while a trace is active becomes a
 * checkpoint in it.
 *
 * All entry points run under a thread-local re-entrancy guard: delivering a
 * completed trace can itself hit instrumented code, and those nested calls
 * are ignored instead of recursing into the engine.
 */

use super::data::{ThreadTraceData, TraceTree, UniqueTraceKey};
use crate::appender::{AppenderHandle, DeliverDataTask, PerfMonData};
use crate::core::limits::{MAX_EXTERNAL_TRACE_ELEMENTS, MAX_INTERNAL_TRACE_ELEMENTS};
use crate::core::Millis;
use crate::scheduler::TimerHandle;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Trace category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCategory {
    Internal,
    External,
}

impl TraceCategory {
    pub fn max_elements(self) -> usize {
        match self {
            TraceCategory::Internal => MAX_INTERNAL_TRACE_ELEMENTS,
            TraceCategory::External => MAX_EXTERNAL_TRACE_ELEMENTS,
        }
    }
}

/// Destination for a completed trace
#[derive(Debug, Clone)]
pub(crate) enum TraceSink {
    /// Handed to the appenders on the priority timer, never on the traced thread
    Appenders {
        appenders: Arc<[Arc<AppenderHandle>]>,
        timer: TimerHandle,
    },
    Requester(flume::Sender<ThreadTraceData>),
}

/// Settings for a trace about to start
#[derive(Debug, Clone)]
pub(crate) struct TraceStart {
    pub category: TraceCategory,
    pub max_depth: u32,
    pub min_duration: Millis,
    pub sink: TraceSink,
}

struct ActiveTrace {
    root_name: Arc<str>,
    tree: TraceTree,
    min_duration: Millis,
    sink: TraceSink,
}

#[derive(Default)]
struct ThreadTraces {
    internal: Vec<ActiveTrace>,
    external: Vec<ActiveTrace>,
}

impl ThreadTraces {
    fn stack(&mut self, category: TraceCategory) -> &mut Vec<ActiveTrace> {
        match category {
            TraceCategory::Internal => &mut self.internal,
            TraceCategory::External => &mut self.external,
        }
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut ActiveTrace> {
        self.internal.iter_mut().chain(self.external.iter_mut())
    }

    fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }
}

thread_local! {
    static THREAD_TRACES: RefCell<ThreadTraces> = RefCell::new(ThreadTraces::default());
    static INSIDE_ENGINE: Cell<bool> = const { Cell::new(false) };
}

/// Scoped re-entrancy guard; at most one live per thread
pub(crate) struct ReentrancyGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ReentrancyGuard {
    pub(crate) fn acquire() -> Option<Self> {
        INSIDE_ENGINE.with(|inside| {
            if inside.replace(true) {
                None
            } else {
                Some(Self {
                    _not_send: std::marker::PhantomData,
                })
            }
        })
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        INSIDE_ENGINE.with(|inside| inside.set(false));
    }
}

/// Whether the current thread has any active trace
#[inline]
pub fn has_active_traces() -> bool {
    THREAD_TRACES.with(|t| !t.borrow().is_empty())
}

/// Add a checkpoint to every active trace on this thread.
/// Returns false when no trace is active or the call is re-entrant.
pub(crate) fn enter_checkpoint(key: &UniqueTraceKey, now: Millis) -> bool {
    let Some(_guard) = ReentrancyGuard::acquire() else {
        return false;
    };
    THREAD_TRACES.with(|cell| {
        let mut traces = cell.borrow_mut();
        if traces.is_empty() {
            return false;
        }
        for trace in traces.all_mut() {
            trace.tree.enter(key, now);
        }
        true
    })
}

/// Start a trace rooted at `key`. Refused when a trace rooted at the same
/// monitor is already active in that category on this thread.
pub(crate) fn start_trace(key: &UniqueTraceKey, now: Millis, start: TraceStart) -> bool {
    let Some(_guard) = ReentrancyGuard::acquire() else {
        return false;
    };
    THREAD_TRACES.with(|cell| {
        let mut traces = cell.borrow_mut();
        let stack = traces.stack(start.category);
        if stack.iter().any(|t| &t.root_name == key.name()) {
            return false;
        }
        stack.push(ActiveTrace {
            root_name: Arc::clone(key.name()),
            tree: TraceTree::new(key, now, start.category.max_elements(), start.max_depth),
            min_duration: start.min_duration,
            sink: start.sink,
        });
        true
    })
}

/// Close `key` everywhere it is open. Traces rooted at `key` complete and
/// are delivered to their sinks.
pub(crate) fn exit_checkpoint(key: &UniqueTraceKey, now: Millis) {
    let Some(_guard) = ReentrancyGuard::acquire() else {
        return;
    };

    let completed = THREAD_TRACES.with(|cell| {
        let mut traces = cell.borrow_mut();
        let mut completed = Vec::new();
        for category in [TraceCategory::Internal, TraceCategory::External] {
            let stack = traces.stack(category);
            let mut i = 0;
            while i < stack.len() {
                if stack[i].tree.root_key() == key.id() {
                    completed.push(stack.remove(i));
                } else {
                    stack[i].tree.exit(key, now);
                    i += 1;
                }
            }
        }
        completed
    });

    if completed.is_empty() {
        return;
    }

    // Delivery happens outside the RefCell borrow but inside the guard
    let thread_name = std::thread::current().name().map(str::to_string);
    for trace in completed {
        let data = trace.tree.finish(now, thread_name.clone());
        if data.duration() < trace.min_duration {
            debug!(
                monitor = data.monitor_name(),
                duration_ms = data.duration(),
                "thread trace below minimum duration, discarded"
            );
            continue;
        }
        deliver(trace.sink, data);
    }
}

fn deliver(sink: TraceSink, data: ThreadTraceData) {
    match sink {
        TraceSink::Appenders { appenders, timer } => {
            let monitor = data.monitor_name().to_string();
            let task = Arc::new(DeliverDataTask::new(appenders, PerfMonData::ThreadTrace(data)));
            if let Err(e) = timer.schedule(task, Duration::ZERO) {
                warn!(monitor = %monitor, error = %e, "Thread trace dropped, timer unavailable");
            }
        }
        TraceSink::Requester(sender) => {
            if sender.send(data).is_err() {
                debug!("external thread trace requester went away");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> UniqueTraceKey {
        UniqueTraceKey::new(Arc::from(name))
    }

    fn external(sender: flume::Sender<ThreadTraceData>) -> TraceStart {
        TraceStart {
            category: TraceCategory::External,
            max_depth: 0,
            min_duration: 0,
            sink: TraceSink::Requester(sender),
        }
    }

    #[test]
    fn test_trace_roundtrip_on_thread() {
        std::thread::spawn(|| {
            let (tx, rx) = flume::unbounded();
            let root = key("Root");
            let child = key("Child");

            assert!(!enter_checkpoint(&root, 0));
            assert!(start_trace(&root, 0, external(tx)));
            assert!(has_active_traces());
            assert!(enter_checkpoint(&child, 1));
            exit_checkpoint(&child, 2);
            exit_checkpoint(&root, 3);

            assert!(!has_active_traces());
            let data = rx.try_recv().unwrap();
            assert_eq!(data.monitor_name(), "Root");
            assert_eq!(data.root.children.len(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_duplicate_root_refused() {
        std::thread::spawn(|| {
            let (tx, _rx) = flume::unbounded();
            let first = key("Same");
            let second = key("Same");
            assert!(start_trace(&first, 0, external(tx.clone())));
            assert!(!start_trace(&second, 1, external(tx)));
            exit_checkpoint(&first, 2);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_reentrant_calls_ignored() {
        std::thread::spawn(|| {
            let (tx, rx) = flume::unbounded();
            let root = key("Root");
            assert!(start_trace(&root, 0, external(tx)));

            let guard = ReentrancyGuard::acquire().unwrap();
            assert!(!enter_checkpoint(&key("Nested"), 1));
            drop(guard);

            exit_checkpoint(&root, 2);
            assert!(rx.try_recv().unwrap().root.children.is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_min_duration_discards() {
        std::thread::spawn(|| {
            let (tx, rx) = flume::unbounded();
            let root = key("Fast");
            let start = TraceStart {
                category: TraceCategory::Internal,
                max_depth: 0,
                min_duration: 100,
                sink: TraceSink::Requester(tx),
            };
            assert!(start_trace(&root, 0, start));
            exit_checkpoint(&root, 10);
            assert!(rx.try_recv().is_err());
        })
        .join()
        .unwrap();
    }
}
