/*!
 * PerfMon Agent
 *
 * Owns the monitor registry, the priority and utility timers, the configured
 * appenders and the published pattern mapper. `configure` is the single
 * writer for all of them; the hot path only reads the mapper through an
 * atomic pointer when a new monitor is created.
 */

use super::report::{ConfigProblem, ConfigureReport};
use super::tasks::ExternalTraceCleanupTask;
use crate::appender::{
    AppenderFactory, AppenderHandle, AppenderPatternMapper, MemoryAppender, TEXT_APPENDER,
};
use crate::config::{AppenderDefinition, MonitorDefinition, PerfMonConfig, RuntimeFlags};
use crate::core::limits::{
    EXTERNAL_TRACE_CLEANUP_INTERVAL, EXTERNAL_TRACE_REQUEST_TIMEOUT, ROOT_MONITOR_NAME,
};
use crate::core::{ConfigError, PerfMonError, Result};
use crate::monitor::{
    validate_name, MedianCalculator, MonitorNode, MonitorRegistry, MonitorSettings, PerfMonTimer,
    ThresholdCalculator, TraceBinding,
};
use crate::scheduler::{CancelToken, TaskTimer, TimerHandle};
use crate::trace::TriggerCounts;
use ahash::{AHashMap, RandomState};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Appender attached to monitors whose configured bindings could not be applied
pub const DEFAULT_APPENDER_NAME: &str = "default-text";

type AppenderTable = DashMap<Arc<str>, Arc<AppenderHandle>, RandomState>;

static GLOBAL: OnceLock<PerfMon> = OnceLock::new();

/// Monitoring agent
pub struct PerfMon {
    flags: RuntimeFlags,
    registry: Arc<MonitorRegistry>,
    priority_timer: TaskTimer,
    utility_timer: TaskTimer,
    appenders: Arc<AppenderTable>,
    mapper: Arc<ArcSwap<AppenderPatternMapper>>,
    factory: AppenderFactory,
    force_dynamic: AtomicUsize,
    trigger_counts: RwLock<TriggerCounts>,
    configure_lock: Mutex<()>,
    cleanup_token: Mutex<Option<CancelToken>>,
}

impl std::fmt::Debug for PerfMon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfMon")
            .field("flags", &self.flags)
            .field("monitors", &self.registry.len())
            .field("appenders", &self.appenders.len())
            .finish()
    }
}

impl PerfMon {
    /// Create an agent with its own registry and timers
    pub fn new(flags: RuntimeFlags) -> Result<Self> {
        let registry = Arc::new(MonitorRegistry::new(flags));
        let priority_timer = TaskTimer::new("priority")?;
        let utility_timer = TaskTimer::new("utility")?;
        let appenders: Arc<AppenderTable> = Arc::new(DashMap::with_hasher(RandomState::new()));
        let mapper = Arc::new(ArcSwap::from_pointee(AppenderPatternMapper::default()));

        // Nodes created lazily pick up whatever the current mapper assigns them
        let hook_mapper = Arc::clone(&mapper);
        let hook_appenders = Arc::clone(&appenders);
        let hook_timer = priority_timer.handle().clone();
        registry.set_creation_hook(Some(Arc::new(move |node: &Arc<MonitorNode>| {
            attach_current(node, &hook_mapper, &hook_appenders, &hook_timer);
        })));

        let cleanup = Arc::new(ExternalTraceCleanupTask::new(
            &registry,
            EXTERNAL_TRACE_REQUEST_TIMEOUT,
        ));
        let token = utility_timer.handle().schedule_at_fixed_rate(
            cleanup,
            EXTERNAL_TRACE_CLEANUP_INTERVAL,
            EXTERNAL_TRACE_CLEANUP_INTERVAL,
        )?;

        info!(
            registry_lock = ?flags.registry_lock,
            tracker_mode = ?flags.tracker_mode,
            sql_time = flags.sql_time_enabled,
            "PerfMon agent created"
        );

        Ok(Self {
            flags,
            registry,
            priority_timer,
            utility_timer,
            appenders,
            mapper,
            factory: AppenderFactory::with_builtins(),
            force_dynamic: AtomicUsize::new(0),
            trigger_counts: RwLock::new(TriggerCounts::default()),
            configure_lock: Mutex::new(()),
            cleanup_token: Mutex::new(Some(token)),
        })
    }

    /// Process-wide agent, created from the environment on first use
    pub fn init_global() -> Result<&'static PerfMon> {
        Self::init_global_with(RuntimeFlags::from_env())
    }

    pub fn init_global_with(flags: RuntimeFlags) -> Result<&'static PerfMon> {
        if let Some(existing) = GLOBAL.get() {
            return Ok(existing);
        }
        let agent = PerfMon::new(flags)?;
        // A racing initializer may win; its instance is kept and ours dropped
        let _ = GLOBAL.set(agent);
        GLOBAL
            .get()
            .ok_or_else(|| PerfMonError::Internal("global agent not initialized".to_string()))
    }

    pub fn global() -> Option<&'static PerfMon> {
        GLOBAL.get()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn flags(&self) -> &RuntimeFlags {
        &self.flags
    }

    pub fn registry(&self) -> &Arc<MonitorRegistry> {
        &self.registry
    }

    /// Timer reserved for pushing data to appenders
    pub fn priority_timer(&self) -> &TimerHandle {
        self.priority_timer.handle()
    }

    /// Timer for everything else (snapshot monitors, housekeeping)
    pub fn utility_timer(&self) -> &TimerHandle {
        self.utility_timer.handle()
    }

    /// Appender type registry; register custom types before `configure`
    pub fn factory(&self) -> &AppenderFactory {
        &self.factory
    }

    pub fn appender(&self, name: &str) -> Option<Arc<AppenderHandle>> {
        self.appenders.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn appender_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.appenders.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    /// Buffer of a configured built-in `memory` appender
    pub fn memory_appender(&self, name: &str) -> Option<Arc<MemoryAppender>> {
        self.appender(name)?;
        self.factory.memory_appender(name)
    }

    pub fn mapper(&self) -> Arc<AppenderPatternMapper> {
        self.mapper.load_full()
    }

    pub fn trigger_counts(&self) -> TriggerCounts {
        *self.trigger_counts.read()
    }

    // ------------------------------------------------------------------
    // Monitors and timers
    // ------------------------------------------------------------------

    /// Monitor named `name`, creating it and its ancestors
    pub fn monitor(&self, name: &str) -> Result<Arc<MonitorNode>> {
        Ok(self.registry.get_or_create(name)?)
    }

    /// Existing monitor, never creating one
    pub fn get_monitor(&self, name: &str) -> Option<Arc<MonitorNode>> {
        self.registry.get(name)
    }

    /// Start timing an event on `name`
    pub fn start_timer(&self, name: &str) -> PerfMonTimer {
        match self.registry.get_or_create(name) {
            Ok(node) => PerfMonTimer::start(&node),
            Err(e) => {
                debug!(monitor = name, error = %e, "Timer not started");
                PerfMonTimer::null()
            }
        }
    }

    /// Start timing an event on a runtime-generated name. The monitor is only
    /// created when a configured pattern already matches it or dynamic child
    /// creation is forced; otherwise the timer is null.
    pub fn start_dynamic_timer(&self, name: &str) -> PerfMonTimer {
        let force = self.force_dynamic.load(Ordering::Acquire) > 0;
        let mapper = self.mapper.load();
        let lookup = self
            .registry
            .get_or_create_dynamic(name, |candidate| force || mapper.has_match(candidate));
        match lookup {
            Ok(Some(node)) => PerfMonTimer::start(&node),
            Ok(None) => PerfMonTimer::null(),
            Err(e) => {
                debug!(monitor = name, error = %e, "Dynamic timer not started");
                PerfMonTimer::null()
            }
        }
    }

    /// Allow dynamic monitors to be created regardless of patterns.
    /// Calls nest; each must be paired with `release_dynamic_child_creation`.
    pub fn force_dynamic_child_creation(&self) {
        self.force_dynamic.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release_dynamic_child_creation(&self) {
        let _ = self
            .force_dynamic
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }

    pub fn is_dynamic_child_creation_forced(&self) -> bool {
        self.force_dynamic.load(Ordering::Acquire) > 0
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Apply `config`. Problems are collected in the report instead of
    /// failing the apply.
    pub fn configure(&self, config: &PerfMonConfig) -> ConfigureReport {
        let _writer = self.configure_lock.lock();
        let mut report = ConfigureReport::default();

        self.flush_appenders();

        // Appender instances, reusing unchanged ones
        let mut handles: AHashMap<Arc<str>, Arc<AppenderHandle>> = AHashMap::new();
        for definition in &config.appenders {
            match self.resolve_appender(definition) {
                Ok(handle) => {
                    handles.insert(handle.shared_name(), handle);
                }
                Err(error) => report.push(ConfigProblem::Appender {
                    name: definition.name.clone(),
                    error,
                }),
            }
        }

        // Pattern mapper
        let mut builder = AppenderPatternMapper::builder();
        let mut valid_monitors: Vec<&MonitorDefinition> = Vec::new();
        for monitor in &config.monitors {
            let name = monitor.name.trim();
            if let Err(e) = validate_name(name) {
                report.push(ConfigProblem::Config(e));
                continue;
            }
            valid_monitors.push(monitor);

            let mut fallback = false;
            for binding in &monitor.appenders {
                if !handles.contains_key(binding.appender.as_str()) {
                    if config.appender(&binding.appender).is_none() {
                        report.push(ConfigProblem::Config(ConfigError::UndefinedAppender {
                            monitor: name.to_string(),
                            appender: binding.appender.clone(),
                        }));
                    }
                    fallback = true;
                    continue;
                }
                if let Err(error) = builder.add(name, &binding.pattern, &binding.appender) {
                    report.push(ConfigProblem::Pattern {
                        monitor: name.to_string(),
                        pattern: binding.pattern.clone(),
                        error,
                    });
                    fallback = true;
                }
            }

            if fallback {
                match self.default_appender(&handles) {
                    Ok(handle) => {
                        let _ = builder.add(name, ".", handle.name());
                        handles.insert(handle.shared_name(), handle);
                        report.fallback_monitors.push(name.to_string());
                    }
                    Err(error) => report.push(ConfigProblem::Appender {
                        name: DEFAULT_APPENDER_NAME.to_string(),
                        error,
                    }),
                }
            }
        }

        let mapper = match builder.build() {
            Ok(mapper) => mapper,
            Err(error) => {
                report.push(ConfigProblem::Pattern {
                    monitor: ROOT_MONITOR_NAME.to_string(),
                    pattern: String::new(),
                    error,
                });
                AppenderPatternMapper::default()
            }
        };

        // Publish: replaced handles are retired once no node uses them
        let mut retired: Vec<Arc<AppenderHandle>> = Vec::new();
        for (name, handle) in &handles {
            if let Some(previous) = self.appenders.insert(Arc::clone(name), Arc::clone(handle)) {
                if !Arc::ptr_eq(&previous, handle) {
                    retired.push(previous);
                }
            }
        }
        self.mapper.store(Arc::new(mapper));

        // Eager creation of every configured monitor
        for monitor in &valid_monitors {
            if let Err(e) = self.registry.get_or_create(monitor.name.trim()) {
                report.push(ConfigProblem::Config(e));
            }
        }

        self.apply_settings(&valid_monitors);

        let mapper = self.mapper.load();
        for node in self.registry.all_nodes() {
            attach_matching(&node, &mapper, &self.appenders, self.priority_timer.handle());
        }

        let trace_appenders = self.apply_thread_traces(config, &handles, &mut report);

        // Purge appenders nothing references any more
        let mut referenced = mapper.referenced_appenders();
        referenced.extend(trace_appenders);
        let stale: Vec<Arc<str>> = self
            .appenders
            .iter()
            .filter(|entry| !referenced.contains(entry.key()))
            .map(|entry| Arc::clone(entry.key()))
            .collect();
        for name in stale {
            if let Some((_, handle)) = self.appenders.remove(&name) {
                retired.push(handle);
            }
        }
        for handle in retired {
            self.retire(&handle);
        }

        report.appenders = self.appenders.len();
        report.monitors = self.registry.len();

        for problem in &report.problems {
            warn!(problem = %problem, "Configuration partially applied");
        }
        info!(
            appenders = report.appenders,
            monitors = report.monitors,
            problems = report.problems.len(),
            "Configuration applied"
        );
        report
    }

    fn resolve_appender(
        &self,
        definition: &AppenderDefinition,
    ) -> std::result::Result<Arc<AppenderHandle>, crate::core::AppenderError> {
        if let Some(existing) = self.appender(&definition.name) {
            if existing.definition() == definition {
                return Ok(existing);
            }
        }
        let sink = self.factory.create(definition)?;
        AppenderHandle::new(definition.clone(), sink)
            .map_err(|e| crate::core::AppenderError::Output(e.to_string()))
    }

    fn retire(&self, handle: &AppenderHandle) {
        handle.deinit();
        self.factory.forget(handle.name(), handle.sink());
    }

    fn default_appender(
        &self,
        handles: &AHashMap<Arc<str>, Arc<AppenderHandle>>,
    ) -> std::result::Result<Arc<AppenderHandle>, crate::core::AppenderError> {
        if let Some(handle) = handles.get(DEFAULT_APPENDER_NAME) {
            return Ok(Arc::clone(handle));
        }
        self.resolve_appender(&AppenderDefinition::new(DEFAULT_APPENDER_NAME, TEXT_APPENDER))
    }

    /// Effective calculators for every node: nearest configured ancestor wins
    fn apply_settings(&self, monitors: &[&MonitorDefinition]) {
        let by_name: AHashMap<&str, &MonitorDefinition> = monitors
            .iter()
            .map(|m| (m.name.trim(), *m))
            .collect();

        for node in self.registry.all_nodes() {
            let chain: Vec<&MonitorDefinition> = ancestry(&node)
                .iter()
                .filter_map(|name| by_name.get(name.as_ref()).copied())
                .collect();

            let settings = MonitorSettings {
                threshold: chain
                    .iter()
                    .find_map(|d| d.thresholds.as_ref())
                    .map(ThresholdCalculator::from_config),
                median: chain
                    .iter()
                    .find_map(|d| d.median.as_ref())
                    .map(MedianCalculator::from_config),
                active_thread_thresholds: chain
                    .iter()
                    .find_map(|d| d.active_thread_thresholds.clone())
                    .unwrap_or_default(),
            };
            node.set_settings(settings);
        }
    }

    /// Bind thread traces; returns the appender names they reference
    fn apply_thread_traces(
        &self,
        config: &PerfMonConfig,
        handles: &AHashMap<Arc<str>, Arc<AppenderHandle>>,
        report: &mut ConfigureReport,
    ) -> BTreeSet<Arc<str>> {
        for node in self.registry.all_nodes() {
            node.set_thread_trace(None);
        }

        let mut counts = TriggerCounts::default();
        let mut referenced = BTreeSet::new();
        for definition in &config.thread_traces {
            let node = match self.registry.get_or_create(&definition.monitor) {
                Ok(node) => node,
                Err(e) => {
                    report.push(ConfigProblem::Config(e));
                    continue;
                }
            };

            let mut appenders = Vec::new();
            for name in &definition.config.appenders {
                match handles.get(name.as_str()) {
                    Some(handle) => {
                        referenced.insert(handle.shared_name());
                        appenders.push(Arc::clone(handle));
                    }
                    None => report.push(ConfigProblem::Config(ConfigError::UndefinedAppender {
                        monitor: definition.monitor.clone(),
                        appender: name.clone(),
                    })),
                }
            }

            for trigger in &definition.config.triggers {
                counts.add(trigger);
            }
            node.set_thread_trace(Some(TraceBinding {
                config: definition.config.clone(),
                appenders: appenders.into(),
                timer: self.priority_timer.handle().clone(),
            }));
        }

        *self.trigger_counts.write() = counts;
        referenced
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drain and flush every appender
    pub fn flush_appenders(&self) {
        let handles: Vec<Arc<AppenderHandle>> =
            self.appenders.iter().map(|e| Arc::clone(e.value())).collect();
        for handle in handles {
            handle.flush();
        }
    }

    /// Detach everything, deinitialize appenders and stop the timers.
    /// Monitors keep their lifetime totals and can still be timed.
    pub fn deinit(&self) {
        let _writer = self.configure_lock.lock();

        if let Some(token) = self.cleanup_token.lock().take() {
            token.cancel();
        }
        self.mapper.store(Arc::new(AppenderPatternMapper::default()));

        for node in self.registry.all_nodes() {
            node.set_thread_trace(None);
            if let Err(e) = node.reset_appenders(&[], self.priority_timer.handle()) {
                warn!(monitor = node.name(), error = %e, "Failed to detach appenders");
            }
        }

        let handles: Vec<Arc<AppenderHandle>> =
            self.appenders.iter().map(|e| Arc::clone(e.value())).collect();
        self.appenders.clear();
        for handle in handles {
            self.retire(&handle);
        }
        *self.trigger_counts.write() = TriggerCounts::default();

        self.priority_timer.shutdown();
        self.utility_timer.shutdown();
        info!("PerfMon agent deinitialized");
    }
}

/// Reconcile `node`'s appenders with what `mapper` assigns it
fn attach_matching(
    node: &Arc<MonitorNode>,
    mapper: &AppenderPatternMapper,
    appenders: &AppenderTable,
    timer: &TimerHandle,
) {
    let desired: Vec<Arc<AppenderHandle>> = mapper
        .get_appenders_for_monitor(node.name())
        .iter()
        .filter_map(|name| appenders.get(name).map(|entry| Arc::clone(entry.value())))
        .collect();
    if let Err(e) = node.reset_appenders(&desired, timer) {
        warn!(monitor = node.name(), error = %e, "Failed to attach appenders");
    }
}

/// Attach by the published mapper, again if `configure` swapped it meanwhile
fn attach_current(
    node: &Arc<MonitorNode>,
    mapper: &ArcSwap<AppenderPatternMapper>,
    appenders: &AppenderTable,
    timer: &TimerHandle,
) {
    loop {
        let used = mapper.load_full();
        attach_matching(node, &used, appenders, timer);
        if Arc::ptr_eq(&used, &*mapper.load()) {
            return;
        }
    }
}

/// Names of `node` and its ancestors, nearest first
fn ancestry(node: &Arc<MonitorNode>) -> Vec<Arc<str>> {
    let mut chain = vec![node.shared_name()];
    let mut current = node.parent();
    while let Some(parent) = current {
        chain.push(parent.shared_name());
        current = parent.parent();
    }
    chain
}
