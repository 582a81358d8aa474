/*!
 * PerfMon Timer
 * Scoped measurement of one event on one monitor
 */

use super::node::MonitorNode;
use crate::core::{now_millis, Millis};
use crate::trace::UniqueTraceKey;
use std::marker::PhantomData;
use std::sync::Arc;

struct RunningEvent {
    node: Arc<MonitorNode>,
    key: Option<UniqueTraceKey>,
}

/// Measures one event from `start` to `stop`.
///
/// Re-entrancy and trace bookkeeping are per thread, so a timer must be
/// stopped on the thread that started it and the type is `!Send`.
/// Dropping a running timer stops it. A null timer (from a suppressed
/// dynamic monitor) does nothing.
#[must_use = "dropping a timer immediately stops it"]
pub struct PerfMonTimer {
    event: Option<RunningEvent>,
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for PerfMonTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfMonTimer")
            .field("monitor", &self.event.as_ref().map(|e| e.node.name()))
            .finish()
    }
}

impl PerfMonTimer {
    pub fn start(node: &Arc<MonitorNode>) -> Self {
        Self::start_at(node, now_millis())
    }

    /// Start with an explicit timestamp
    pub fn start_at(node: &Arc<MonitorNode>, now: Millis) -> Self {
        let key = node.start(now);
        Self {
            event: Some(RunningEvent {
                node: Arc::clone(node),
                key,
            }),
            _not_send: PhantomData,
        }
    }

    pub fn null() -> Self {
        Self {
            event: None,
            _not_send: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.event.is_none()
    }

    pub fn monitor(&self) -> Option<&Arc<MonitorNode>> {
        self.event.as_ref().map(|e| &e.node)
    }

    pub fn stop(mut self) {
        self.finish(now_millis(), false);
    }

    /// Stop with an explicit timestamp
    pub fn stop_at(mut self, now: Millis) {
        self.finish(now, false);
    }

    /// End the event without recording a completion
    pub fn abort(mut self) {
        self.finish(now_millis(), true);
    }

    fn finish(&mut self, now: Millis, abort: bool) {
        if let Some(event) = self.event.take() {
            event.node.stop(now, event.key.as_ref(), abort);
        }
    }
}

impl Drop for PerfMonTimer {
    fn drop(&mut self) {
        if self.event.is_some() {
            self.finish(now_millis(), false);
        }
    }
}
