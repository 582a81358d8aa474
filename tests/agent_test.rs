/*!
 * Agent Tests
 * End-to-end configure, partial-load fallback, dynamic monitors and lifecycle
 */

use perfmon::agent::DEFAULT_APPENDER_NAME;
use perfmon::appender::{MemoryAppender, JSON_LINES_APPENDER, MEMORY_APPENDER};
use perfmon::{
    Appender, AppenderDefinition, ConfigError, ConfigProblem, IntervalData, MonitorDefinition,
    PerfMon, PerfMonConfig, PerfMonTimer, RuntimeFlags,
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn agent() -> PerfMon {
    PerfMon::new(RuntimeFlags::default()).unwrap()
}

fn memory(name: &str) -> AppenderDefinition {
    AppenderDefinition::new(name, MEMORY_APPENDER).with_interval(Duration::from_millis(100))
}

/// Collect intervals for `monitor` until `completions` events were reported
fn collect_intervals(memory: &MemoryAppender, monitor: &str, completions: u64) -> Vec<IntervalData> {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut collected = Vec::new();
    loop {
        collected.extend(
            memory
                .take_all()
                .iter()
                .filter_map(|d| d.as_interval())
                .filter(|i| i.monitor_name() == monitor)
                .cloned(),
        );
        let seen: u64 = collected.iter().map(|i| i.total_completions()).sum();
        if seen >= completions || Instant::now() >= deadline {
            return collected;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn test_orders_end_to_end() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(memory("mem"))
        .with_monitor(MonitorDefinition::new("Orders").with_appender("mem", "."));
    let report = agent.configure(&config);
    assert!(report.is_clean(), "{:?}", report.problems);
    assert_eq!(report.appenders, 1);

    let node = agent.monitor("Orders").unwrap();
    assert!(node.is_active());
    let t0 = node.start_time().unwrap();
    for (i, duration) in [10, 20, 30, 40, 50].into_iter().enumerate() {
        let start = t0 + i as i64;
        PerfMonTimer::start_at(&node, start).stop_at(start + duration);
    }

    let memory = agent.memory_appender("mem").unwrap();
    let intervals = collect_intervals(&memory, "Orders", 5);
    let reported: Vec<&IntervalData> = intervals
        .iter()
        .filter(|i| i.total_completions() > 0)
        .collect();

    assert_eq!(reported.iter().map(|i| i.total_completions()).sum::<u64>(), 5);
    assert_eq!(reported.iter().map(|i| i.total_duration()).sum::<i64>(), 150);
    assert_eq!(reported.iter().map(|i| i.min_duration()).min(), Some(10));
    assert_eq!(reported.iter().map(|i| i.max_duration()).max(), Some(50));
    assert!(intervals.iter().all(|i| i.start() <= i.end()));

    agent.deinit();
}

#[test]
fn test_partial_config_falls_back_to_text() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(memory("mem"))
        .with_appender(AppenderDefinition::new("pigeon", "carrier-pigeon"))
        .with_monitor(MonitorDefinition::new("Missing").with_appender("nowhere", "."))
        .with_monitor(MonitorDefinition::new("BadPattern").with_appender("mem", "get*"))
        .with_monitor(MonitorDefinition::new("Broken").with_appender("pigeon", "."))
        .with_monitor(MonitorDefinition::new("Fine").with_appender("mem", "."))
        .with_monitor(MonitorDefinition::new("Bad..Name").with_appender("mem", "."));

    let report = agent.configure(&config);
    assert!(!report.is_clean());
    assert_eq!(report.problems.len(), 4);
    assert!(report.problems.contains(&ConfigProblem::Config(
        ConfigError::UndefinedAppender {
            monitor: "Missing".to_string(),
            appender: "nowhere".to_string(),
        }
    )));
    assert!(report
        .problems
        .iter()
        .any(|p| matches!(p, ConfigProblem::Pattern { monitor, .. } if monitor == "BadPattern")));
    assert!(report
        .problems
        .iter()
        .any(|p| matches!(p, ConfigProblem::Appender { name, .. } if name == "pigeon")));
    assert!(report
        .problems
        .iter()
        .any(|p| matches!(p, ConfigProblem::Config(ConfigError::InvalidMonitorName(_)))));
    assert_eq!(report.fallback_monitors, vec!["Missing", "BadPattern", "Broken"]);

    for monitor in ["Missing", "BadPattern", "Broken"] {
        let node = agent.get_monitor(monitor).unwrap();
        assert_eq!(node.appender_names(), vec![DEFAULT_APPENDER_NAME]);
    }
    assert_eq!(agent.get_monitor("Fine").unwrap().appender_names(), vec!["mem"]);
    assert!(agent.appender("pigeon").is_none());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["problems"][0]["kind"], "appender");
    assert_eq!(json["fallback_monitors"][0], "Missing");

    agent.deinit();
}

#[test]
fn test_padded_monitor_name_routes_to_trimmed_node() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(memory("mem"))
        .with_monitor(MonitorDefinition::new(" Orders ").with_appender("mem", "./*"));
    let report = agent.configure(&config);
    assert!(report.is_clean(), "{:?}", report.problems);

    let node = agent.get_monitor("Orders").unwrap();
    assert_eq!(node.appender_names(), vec!["mem"]);
    assert!(node.is_active());
    assert_eq!(agent.monitor("Orders.child").unwrap().appender_names(), vec!["mem"]);

    agent.deinit();
}

#[test]
fn test_dynamic_monitors_follow_patterns() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(memory("mem"))
        .with_monitor(MonitorDefinition::new("User").with_appender("mem", "./*"));
    assert!(agent.configure(&config).is_clean());

    let matched = agent.start_dynamic_timer("User.alice");
    assert!(!matched.is_null());
    matched.stop();
    assert_eq!(agent.get_monitor("User.alice").unwrap().appender_names(), vec!["mem"]);

    assert!(agent.start_dynamic_timer("Session.42").is_null());
    assert!(agent.get_monitor("Session.42").is_none());
    assert!(agent.get_monitor("Session").is_none());

    agent.force_dynamic_child_creation();
    assert!(agent.is_dynamic_child_creation_forced());
    let forced = agent.start_dynamic_timer("Session.42");
    assert!(!forced.is_null());
    forced.stop();
    agent.release_dynamic_child_creation();
    assert!(!agent.is_dynamic_child_creation_forced());

    let forced_node = agent.get_monitor("Session.42").unwrap();
    assert!(forced_node.appender_names().is_empty());
    assert!(!forced_node.is_active());

    // Static lookups always create
    assert!(!agent.start_timer("Static.path").is_null());

    agent.deinit();
}

#[test]
fn test_reconfigure_reuses_unchanged_appenders() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(memory("mem"))
        .with_monitor(MonitorDefinition::new("Orders").with_appender("mem", "./**"));
    agent.configure(&config);
    let first = agent.appender("mem").unwrap();
    let child = agent.monitor("Orders.create").unwrap();
    assert_eq!(child.appender_names(), vec!["mem"]);

    agent.configure(&config);
    assert!(Arc::ptr_eq(&first, &agent.appender("mem").unwrap()));

    let changed = PerfMonConfig::new()
        .with_appender(memory("mem").with_interval(Duration::from_millis(200)))
        .with_monitor(MonitorDefinition::new("Orders").with_appender("mem", "./**"));
    agent.configure(&changed);
    let second = agent.appender("mem").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.interval(), Duration::from_millis(200));
    assert_eq!(child.appender_names(), vec!["mem"]);
    let lookup = agent.factory().memory_appender("mem").unwrap();
    assert_eq!(
        Arc::as_ptr(&lookup) as *const (),
        Arc::as_ptr(second.sink()) as *const ()
    );

    // Dropping the binding detaches and deactivates
    agent.configure(&PerfMonConfig::new().with_appender(memory("mem")));
    assert!(agent.appender("mem").is_none());
    assert!(agent.factory().memory_appender("mem").is_none());
    assert!(child.appender_names().is_empty());
    assert!(!child.is_active());

    agent.deinit();
}

#[test]
fn test_nodes_created_during_configure_follow_latest_mapper() {
    let agent = Arc::new(agent());
    let routed_to = |appender: &str| {
        PerfMonConfig::new()
            .with_appender(memory(appender).with_interval(Duration::from_secs(60)))
            .with_monitor(MonitorDefinition::new("Load").with_appender(appender, "./**"))
    };
    let configs = [routed_to("a"), routed_to("b")];
    agent.configure(&configs[0]);

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let agent = Arc::clone(&agent);
            std::thread::spawn(move || {
                for i in 0..300 {
                    agent.monitor(&format!("Load.t{}.n{}", t, i)).unwrap();
                }
            })
        })
        .collect();

    let mut round = 0;
    while workers.iter().any(|w| !w.is_finished()) {
        round += 1;
        agent.configure(&configs[round % 2]);
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let mapper = agent.mapper();
    for node in agent.registry().all_nodes() {
        if !node.name().starts_with("Load") {
            continue;
        }
        let expected: Vec<String> = mapper
            .get_appenders_for_monitor(node.name())
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(node.appender_names(), expected, "{}", node.name());
    }

    agent.deinit();
}

#[test]
fn test_settings_inherited_from_nearest_ancestor() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_monitor(
            MonitorDefinition::new("Orders")
                .with_thresholds(vec![100, 500])
                .with_active_thread_thresholds(vec![1_000]),
        )
        .with_monitor(MonitorDefinition::new("Orders.fast").with_active_thread_thresholds(vec![5]));
    assert!(agent.configure(&config).is_clean());

    let fast = agent.get_monitor("Orders.fast").unwrap();
    assert_eq!(fast.settings().active_thread_thresholds, vec![5]);
    assert!(fast.settings().threshold.is_some());

    let slow = agent.monitor("Orders.slow").unwrap();
    assert_eq!(slow.settings().active_thread_thresholds, vec![1_000]);

    agent.configure(&PerfMonConfig::new());
    assert!(slow.settings().active_thread_thresholds.is_empty());
    assert!(fast.settings().threshold.is_none());

    agent.deinit();
}

#[test]
fn test_custom_appender_type() {
    let agent = agent();
    let captured = Arc::new(MemoryAppender::new(16));
    let sink = Arc::clone(&captured);
    agent.factory().register("capture", move |_definition| {
        Ok(Arc::clone(&sink) as Arc<dyn Appender>)
    });

    let config = PerfMonConfig::new()
        .with_appender(
            AppenderDefinition::new("cap", "capture").with_interval(Duration::from_millis(100)),
        )
        .with_monitor(MonitorDefinition::new("Custom").with_appender("cap", "."));
    assert!(agent.configure(&config).is_clean());
    assert_eq!(agent.appender("cap").unwrap().kind(), "capture");

    agent.start_timer("Custom").stop();
    let intervals = collect_intervals(&captured, "Custom", 1);
    assert_eq!(intervals.iter().map(|i| i.total_completions()).sum::<u64>(), 1);

    agent.deinit();
}

#[test]
fn test_json_lines_appender_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perfmon.jsonl");

    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(
            AppenderDefinition::new("disk", JSON_LINES_APPENDER)
                .with_interval(Duration::from_millis(100))
                .with_options(serde_json::json!({ "path": path })),
        )
        .with_monitor(MonitorDefinition::new("Disk").with_appender("disk", "."));
    assert!(agent.configure(&config).is_clean());
    agent.start_timer("Disk").stop();

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut contents = String::new();
    while Instant::now() < deadline {
        agent.flush_appenders();
        contents = std::fs::read_to_string(&path).unwrap_or_default();
        if contents.contains("\"Disk\"") {
            break;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    assert!(contents.contains("\"Disk\""));
    for line in contents.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["type"], "interval");
    }

    agent.deinit();
}

#[test]
fn test_deinit_detaches_everything() {
    let agent = agent();
    let config = PerfMonConfig::new()
        .with_appender(memory("mem"))
        .with_monitor(MonitorDefinition::new("Orders").with_appender("mem", "./**"));
    agent.configure(&config);
    let node = agent.monitor("Orders.create").unwrap();
    assert!(node.is_active());

    agent.deinit();
    assert!(!node.is_active());
    assert!(node.appender_names().is_empty());
    assert!(agent.appender_names().is_empty());
    assert_eq!(agent.mapper().entry_count(), 0);

    // Timing still works, it just records nothing
    agent.start_timer("Orders.create").stop();
    assert_eq!(node.total_hits(), 0);
}

#[test]
#[serial]
fn test_global_agent() {
    let first = PerfMon::init_global_with(RuntimeFlags::default()).unwrap();
    let second = PerfMon::init_global().unwrap();
    assert!(std::ptr::eq(first, second));
    assert!(std::ptr::eq(first, PerfMon::global().unwrap()));
}
