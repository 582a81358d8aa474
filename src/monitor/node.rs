/*!
 * Monitor Node
 *
 * Aggregation state machine for one named monitor. A node is inactive until
 * an appender or external element attaches; while active, every outermost
 * start/stop on any thread is folded into the node's window, its lifetime
 * totals, and each attached consumer's open interval.
 *
 * Counter mutation and snapshots share one node-local mutex, so sibling
 * monitors never contend and a snapshot never observes a half-applied stop.
 */

use super::calculators::{MedianCalculator, ThresholdCalculator};
use super::interval::{IntervalData, LiveInterval};
use super::sql_time;
use super::stats::{throughput_per_minute, Accumulator, ThroughputRecord};
use super::tracker::{self, Entry, RunningThread, ThreadConcurrencyTracker};
use crate::appender::{AppenderHandle, PushAppenderDataTask};
use crate::config::RuntimeFlags;
use crate::core::id::MONITOR_IDS;
use crate::core::limits::{
    MAX_APPENDERS_PER_MONITOR, MAX_EXTERNAL_ELEMENTS_PER_MONITOR, ROOT_MONITOR_NAME,
};
use crate::core::time::{duration_millis, elapsed_between};
use crate::core::{now_millis, AppenderError, Millis, MonitorId, PerfMonError, Result};
use crate::scheduler::{CancelToken, TimerHandle};
use crate::trace::{
    self, ThreadTraceConfig, ThreadTraceData, TraceCategory, TraceSink, TraceStart,
    UniqueTraceKey,
};
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Handle for an interval slot registered by external tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalElementId(u64);

/// Calculator and active-thread settings in effect for a node
#[derive(Debug, Clone, Default)]
pub struct MonitorSettings {
    pub threshold: Option<ThresholdCalculator>,
    pub median: Option<MedianCalculator>,
    pub active_thread_thresholds: Vec<u64>,
}

/// Internal thread trace rooted at a node
#[derive(Debug, Clone)]
pub(crate) struct TraceBinding {
    pub config: ThreadTraceConfig,
    pub appenders: Arc<[Arc<AppenderHandle>]>,
    pub timer: TimerHandle,
}

/// Threads running longer than one threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCount {
    pub threshold_millis: u64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongestRunning {
    pub thread_name: Option<String>,
    pub running_millis: Millis,
}

/// Point-in-time view of the threads inside a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveThreadReport {
    pub monitor: String,
    pub timestamp: Millis,
    pub active_threads: u32,
    pub longest_running: Option<LongestRunning>,
    pub over_thresholds: Vec<ThresholdCount>,
}

struct AppenderSlot {
    appender: Arc<AppenderHandle>,
    live: LiveInterval,
    token: CancelToken,
}

struct ExternalSlot {
    id: ExternalElementId,
    live: LiveInterval,
}

struct ExternalTraceRequest {
    requested_at: Millis,
    sender: flume::Sender<ThreadTraceData>,
}

#[derive(Default)]
struct NodeState {
    start_time: Option<Millis>,
    window: Accumulator,
    lifetime: Accumulator,
    max_throughput: Option<ThroughputRecord>,
    appenders: Vec<AppenderSlot>,
    externals: Vec<ExternalSlot>,
    settings: MonitorSettings,
}

impl NodeState {
    fn fresh_interval(&self, now: Millis) -> LiveInterval {
        LiveInterval::new(
            now,
            self.settings.threshold.as_ref(),
            self.settings.median.as_ref(),
        )
    }

    fn is_idle(&self) -> bool {
        self.appenders.is_empty() && self.externals.is_empty()
    }
}

/// One named monitor in the hierarchy
pub struct MonitorNode {
    id: MonitorId,
    name: Arc<str>,
    parent: Weak<MonitorNode>,
    children: RwLock<Vec<Arc<MonitorNode>>>,
    tracker: Arc<ThreadConcurrencyTracker>,
    sql_time_enabled: bool,
    lifetime_start: Millis,
    active: AtomicBool,
    state: Mutex<NodeState>,
    trace: ArcSwapOption<TraceBinding>,
    external_requests: Mutex<VecDeque<ExternalTraceRequest>>,
    pending_external: AtomicUsize,
    next_external: AtomicU64,
}

impl fmt::Debug for MonitorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MonitorNode {
    pub(crate) fn new_root(flags: &RuntimeFlags) -> Arc<Self> {
        Arc::new(Self::build(Arc::from(ROOT_MONITOR_NAME), Weak::new(), flags))
    }

    /// Create a child of `parent`, inheriting its effective settings
    pub(crate) fn new_child(name: &str, parent: &Arc<MonitorNode>, flags: &RuntimeFlags) -> Arc<Self> {
        let node = Self::build(Arc::from(name), Arc::downgrade(parent), flags);
        node.state.lock().settings = parent.settings();
        let node = Arc::new(node);
        parent.children.write().push(Arc::clone(&node));
        node
    }

    fn build(name: Arc<str>, parent: Weak<MonitorNode>, flags: &RuntimeFlags) -> Self {
        Self {
            id: MONITOR_IDS.next(),
            name,
            parent,
            children: RwLock::new(Vec::new()),
            tracker: Arc::new(ThreadConcurrencyTracker::new(flags.tracker_mode)),
            sql_time_enabled: flags.sql_time_enabled,
            lifetime_start: now_millis(),
            active: AtomicBool::new(false),
            state: Mutex::new(NodeState::default()),
            trace: ArcSwapOption::empty(),
            external_requests: Mutex::new(VecDeque::new()),
            pending_external: AtomicUsize::new(0),
            next_external: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn id(&self) -> MonitorId {
        self.id
    }

    /// Dotted name without the root prefix (`<ROOT>` for the root itself)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Last segment of the name
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn is_root(&self) -> bool {
        self.parent.upgrade().is_none() && &*self.name == ROOT_MONITOR_NAME
    }

    pub fn parent(&self) -> Option<Arc<MonitorNode>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> Vec<Arc<MonitorNode>> {
        self.children.read().clone()
    }

    pub fn tracker(&self) -> &Arc<ThreadConcurrencyTracker> {
        &self.tracker
    }

    // ------------------------------------------------------------------
    // Hot path
    // ------------------------------------------------------------------

    /// Outermost entry of the calling thread. Returns the trace key when a
    /// checkpoint or trace was opened; the caller hands it back to `stop`.
    pub(crate) fn start(&self, now: Millis) -> Option<UniqueTraceKey> {
        let sql_now = self.sql_time_enabled.then(sql_time::current);
        let Entry::Outermost { active_threads } =
            tracker::enter(self.id, &self.tracker, now, sql_now)
        else {
            return None;
        };

        if self.active.load(Ordering::Acquire) {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.start_time.is_some() {
                state.window.record_start(active_threads, now);
                state.lifetime.record_start(active_threads, now);
                for slot in state.appenders.iter_mut() {
                    slot.live.record_start(active_threads, now);
                }
                for slot in state.externals.iter_mut() {
                    slot.live.record_start(active_threads, now);
                }
            }
        }

        self.open_trace(now)
    }

    /// Exit of the calling thread. Only the outermost exit records; aborted
    /// events and events that began before the current window are dropped.
    pub(crate) fn stop(&self, now: Millis, key: Option<&UniqueTraceKey>, abort: bool) {
        if let Some(key) = key {
            trace::exit_checkpoint(key, now);
        }

        let Some(exit) = tracker::exit(self.id, &self.tracker) else {
            return;
        };
        if abort || !self.active.load(Ordering::Acquire) {
            return;
        }

        let duration = elapsed_between(exit.event_start, now);
        let sql_duration = exit
            .sql_start
            .map(|start| elapsed_between(start, sql_time::current()));

        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.start_time {
            Some(window_start) if window_start <= exit.event_start => {}
            _ => return,
        }

        state.window.record_stop(duration, sql_duration, now);
        state.lifetime.record_stop(duration, sql_duration, now);
        for slot in state.appenders.iter_mut() {
            slot.live.record_stop(duration, sql_duration, now);
        }
        for slot in state.externals.iter_mut() {
            slot.live.record_stop(duration, sql_duration, now);
        }
    }

    fn open_trace(&self, now: Millis) -> Option<UniqueTraceKey> {
        let binding = self.trace.load_full();
        let external_pending = self.pending_external.load(Ordering::Acquire) > 0;
        if binding.is_none() && !external_pending && !trace::has_active_traces() {
            return None;
        }

        let key = UniqueTraceKey::new(Arc::clone(&self.name));
        let mut opened = trace::enter_checkpoint(&key, now);

        if let Some(binding) = binding {
            if binding.config.should_trace(&std::thread::current()) {
                opened |= trace::start_trace(
                    &key,
                    now,
                    TraceStart {
                        category: TraceCategory::Internal,
                        max_depth: binding.config.max_depth,
                        min_duration: binding.config.min_duration_to_capture as Millis,
                        sink: TraceSink::Appenders {
                            appenders: Arc::clone(&binding.appenders),
                            timer: binding.timer.clone(),
                        },
                    },
                );
            }
        }

        if external_pending {
            if let Some(request) = self.pop_external_request() {
                let start = TraceStart {
                    category: TraceCategory::External,
                    max_depth: 0,
                    min_duration: 0,
                    sink: TraceSink::Requester(request.sender.clone()),
                };
                if trace::start_trace(&key, now, start) {
                    opened = true;
                } else {
                    self.push_external_request(request, true);
                }
            }
        }

        opened.then_some(key)
    }

    // ------------------------------------------------------------------
    // Appenders
    // ------------------------------------------------------------------

    /// Attach `appender` and schedule its push task on `timer`.
    /// Returns `false` when an appender with the same name is already attached.
    pub fn add_appender(
        self: &Arc<Self>,
        appender: &Arc<AppenderHandle>,
        timer: &TimerHandle,
    ) -> Result<bool> {
        let now = now_millis();
        let mut guard = self.state.lock();
        self.attach(&mut guard, appender, timer, now)
    }

    /// Detach the appender named `name`; the last detach deactivates the node
    pub fn remove_appender(&self, name: &str) -> bool {
        let mut guard = self.state.lock();
        let removed = Self::detach(&mut guard, name);
        if removed {
            self.deactivate_if_idle(&mut guard);
        }
        removed
    }

    /// Make the attached set exactly `desired`, attaching and detaching as
    /// needed. The node is only deactivated if the final set is empty.
    /// Every change is attempted; the first failure is returned.
    pub fn reset_appenders(
        self: &Arc<Self>,
        desired: &[Arc<AppenderHandle>],
        timer: &TimerHandle,
    ) -> Result<()> {
        let now = now_millis();
        let mut guard = self.state.lock();

        let stale: Vec<Arc<str>> = guard
            .appenders
            .iter()
            .filter(|slot| !desired.iter().any(|d| Arc::ptr_eq(d, &slot.appender)))
            .map(|slot| slot.appender.shared_name())
            .collect();
        for name in &stale {
            Self::detach(&mut guard, name);
        }

        let mut first_error = None;
        for appender in desired {
            if let Err(e) = self.attach(&mut guard, appender, timer, now) {
                first_error.get_or_insert(e);
            }
        }

        self.deactivate_if_idle(&mut guard);
        first_error.map_or(Ok(()), Err)
    }

    /// Names of the attached appenders
    pub fn appender_names(&self) -> Vec<String> {
        self.state
            .lock()
            .appenders
            .iter()
            .map(|slot| slot.appender.name().to_string())
            .collect()
    }

    /// Close the open interval of `appender` and start the next one
    pub(crate) fn snapshot_for(&self, appender: &str, now: Millis) -> Option<IntervalData> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let fresh = state.fresh_interval(now);
        let slot = state
            .appenders
            .iter_mut()
            .find(|slot| slot.appender.name() == appender)?;
        let finished = std::mem::replace(&mut slot.live, fresh);

        let completions = finished.stats().total_completions();
        if completions > 0 {
            let per_minute = throughput_per_minute(completions, finished.start(), now);
            if state
                .max_throughput
                .map_or(true, |best| per_minute >= best.per_minute)
            {
                state.max_throughput = Some(ThroughputRecord {
                    per_minute,
                    window_start: finished.start(),
                    window_end: now,
                });
            }
        }

        Some(finished.finish(
            Arc::clone(&self.name),
            now,
            state.lifetime,
            self.lifetime_start,
            state.max_throughput,
        ))
    }

    fn attach(
        self: &Arc<Self>,
        state: &mut NodeState,
        appender: &Arc<AppenderHandle>,
        timer: &TimerHandle,
        now: Millis,
    ) -> Result<bool> {
        if state
            .appenders
            .iter()
            .any(|slot| slot.appender.name() == appender.name())
        {
            return Ok(false);
        }
        if state.appenders.len() >= MAX_APPENDERS_PER_MONITOR {
            return Err(AppenderError::LimitReached(MAX_APPENDERS_PER_MONITOR).into());
        }

        let token = CancelToken::new();
        Arc::new(PushAppenderDataTask::new(self, Arc::clone(appender), token.clone()))
            .schedule(timer)?;

        self.activate(state, now);
        let live = state.fresh_interval(now);
        state.appenders.push(AppenderSlot {
            appender: Arc::clone(appender),
            live,
            token,
        });
        debug!(monitor = %self.name, appender = appender.name(), "Appender attached");
        Ok(true)
    }

    /// Remove a slot and cancel its push task; the open interval is discarded
    fn detach(state: &mut NodeState, name: &str) -> bool {
        let Some(pos) = state
            .appenders
            .iter()
            .position(|slot| slot.appender.name() == name)
        else {
            return false;
        };
        let slot = state.appenders.remove(pos);
        slot.token.cancel();
        true
    }

    fn activate(&self, state: &mut NodeState, now: Millis) {
        if state.start_time.is_some() {
            return;
        }
        state.start_time = Some(now);
        state.window = Accumulator::new();
        self.active.store(true, Ordering::Release);
        debug!(monitor = %self.name, "Monitor activated");
    }

    fn deactivate_if_idle(&self, state: &mut NodeState) {
        if !state.is_idle() || state.start_time.is_none() {
            return;
        }
        state.start_time = None;
        state.window = Accumulator::new();
        self.active.store(false, Ordering::Release);
        debug!(monitor = %self.name, "Monitor deactivated");
    }

    // ------------------------------------------------------------------
    // External elements
    // ------------------------------------------------------------------

    /// Register an interval slot for live inspection without an appender
    pub fn add_external_element(&self) -> Result<ExternalElementId> {
        let now = now_millis();
        let mut guard = self.state.lock();
        if guard.externals.len() >= MAX_EXTERNAL_ELEMENTS_PER_MONITOR {
            return Err(PerfMonError::ExternalLimitReached(
                MAX_EXTERNAL_ELEMENTS_PER_MONITOR,
            ));
        }
        let id = ExternalElementId(self.next_external.fetch_add(1, Ordering::Relaxed));
        self.activate(&mut guard, now);
        let live = guard.fresh_interval(now);
        guard.externals.push(ExternalSlot { id, live });
        Ok(id)
    }

    /// Close the element's interval and start the next one
    pub fn take_external_element(&self, id: ExternalElementId) -> Option<IntervalData> {
        let now = now_millis();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let fresh = state.fresh_interval(now);
        let slot = state.externals.iter_mut().find(|slot| slot.id == id)?;
        let finished = std::mem::replace(&mut slot.live, fresh);
        Some(finished.finish(
            Arc::clone(&self.name),
            now,
            state.lifetime,
            self.lifetime_start,
            state.max_throughput,
        ))
    }

    pub fn remove_external_element(&self, id: ExternalElementId) -> bool {
        let mut guard = self.state.lock();
        let before = guard.externals.len();
        guard.externals.retain(|slot| slot.id != id);
        let removed = guard.externals.len() != before;
        if removed {
            self.deactivate_if_idle(&mut guard);
        }
        removed
    }

    pub fn external_element_count(&self) -> usize {
        self.state.lock().externals.len()
    }

    // ------------------------------------------------------------------
    // Thread traces
    // ------------------------------------------------------------------

    pub(crate) fn set_thread_trace(&self, binding: Option<TraceBinding>) {
        self.trace.store(binding.map(Arc::new));
    }

    pub fn thread_trace_config(&self) -> Option<ThreadTraceConfig> {
        self.trace.load_full().map(|b| b.config.clone())
    }

    /// Request a one-shot trace of the next outermost event on this monitor.
    /// The receiver disconnects without data if the request expires.
    pub fn schedule_external_trace(&self) -> flume::Receiver<ThreadTraceData> {
        let (sender, receiver) = flume::bounded(1);
        self.push_external_request(
            ExternalTraceRequest {
                requested_at: now_millis(),
                sender,
            },
            false,
        );
        receiver
    }

    pub fn pending_external_traces(&self) -> usize {
        self.pending_external.load(Ordering::Acquire)
    }

    /// Drop requests older than `timeout`; returns how many expired
    pub(crate) fn expire_external_requests(&self, now: Millis, timeout: Duration) -> usize {
        let cutoff = now - duration_millis(timeout);
        let mut queue = self.external_requests.lock();
        let before = queue.len();
        queue.retain(|request| request.requested_at > cutoff && !request.sender.is_disconnected());
        self.pending_external.store(queue.len(), Ordering::Release);
        before - queue.len()
    }

    fn push_external_request(&self, request: ExternalTraceRequest, front: bool) {
        let mut queue = self.external_requests.lock();
        if front {
            queue.push_front(request);
        } else {
            queue.push_back(request);
        }
        self.pending_external.store(queue.len(), Ordering::Release);
    }

    fn pop_external_request(&self) -> Option<ExternalTraceRequest> {
        let mut queue = self.external_requests.lock();
        let request = queue.pop_front();
        self.pending_external.store(queue.len(), Ordering::Release);
        request
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn settings(&self) -> MonitorSettings {
        self.state.lock().settings.clone()
    }

    /// Replace the effective settings; open intervals keep their calculators
    /// until the next window opens
    pub(crate) fn set_settings(&self, settings: MonitorSettings) {
        self.state.lock().settings = settings;
    }

    pub fn active_thread_report(&self, now: Millis) -> ActiveThreadReport {
        let thresholds = self.state.lock().settings.active_thread_thresholds.clone();
        let running: Vec<RunningThread> = self.tracker.all_running();

        let over_thresholds = thresholds
            .iter()
            .map(|&threshold_millis| ThresholdCount {
                threshold_millis,
                count: running
                    .iter()
                    .filter(|r| elapsed_between(r.start, now) > threshold_millis as Millis)
                    .count(),
            })
            .collect();

        ActiveThreadReport {
            monitor: self.name.to_string(),
            timestamp: now,
            active_threads: self.tracker.active_count(),
            longest_running: running.first().map(|r| LongestRunning {
                thread_name: r.name().map(str::to_string),
                running_millis: elapsed_between(r.start, now),
            }),
            over_thresholds,
        }
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start of the current window; `None` while inactive
    pub fn start_time(&self) -> Option<Millis> {
        self.state.lock().start_time
    }

    pub fn lifetime_start(&self) -> Millis {
        self.lifetime_start
    }

    /// Aggregates since the node last became active
    pub fn window(&self) -> Accumulator {
        self.state.lock().window
    }

    /// Aggregates over the node's whole life
    pub fn lifetime(&self) -> Accumulator {
        self.state.lock().lifetime
    }

    pub fn total_hits(&self) -> u64 {
        self.window().total_hits()
    }

    pub fn total_completions(&self) -> u64 {
        self.window().total_completions()
    }

    pub fn min_duration(&self) -> i64 {
        self.window().min_duration()
    }

    pub fn max_duration(&self) -> i64 {
        self.window().max_duration()
    }

    pub fn max_throughput(&self) -> Option<ThroughputRecord> {
        self.state.lock().max_throughput
    }

    pub fn active_thread_count(&self) -> u32 {
        self.tracker.active_count()
    }

    pub fn longest_running(&self) -> Option<RunningThread> {
        self.tracker.longest_running()
    }

    /// Re-entrancy depth of the calling thread
    pub fn current_thread_depth(&self) -> u32 {
        tracker::depth(self.id)
    }
}
