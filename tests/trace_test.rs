/*!
 * Thread Trace Tests
 * Internal traces routed to appenders, triggers, limits and external requests
 */

use perfmon::appender::{MemoryAppender, MEMORY_APPENDER};
use perfmon::trace::{with_trigger_context, TriggerContext};
use perfmon::{
    AppenderDefinition, PerfMon, PerfMonConfig, RuntimeFlags, ThreadTraceConfig, ThreadTraceData,
    TraceTrigger,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TRACES: &str = "traces";

fn agent_with_traces(traces: &[(&str, ThreadTraceConfig)]) -> (PerfMon, Arc<MemoryAppender>) {
    let agent = PerfMon::new(RuntimeFlags::default()).unwrap();
    let mut config =
        PerfMonConfig::new().with_appender(AppenderDefinition::new(TRACES, MEMORY_APPENDER));
    for (monitor, trace) in traces {
        config = config.with_thread_trace(monitor, trace.clone().with_appender(TRACES));
    }
    let report = agent.configure(&config);
    assert!(report.is_clean(), "{:?}", report.problems);
    let memory = agent.memory_appender(TRACES).unwrap();
    (agent, memory)
}

fn traces(memory: &MemoryAppender) -> Vec<ThreadTraceData> {
    memory
        .snapshot()
        .iter()
        .filter_map(|d| d.as_thread_trace().cloned())
        .collect()
}

fn wait_for_traces(memory: &MemoryAppender, count: usize) -> Vec<ThreadTraceData> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let found = traces(memory);
        if found.len() >= count || Instant::now() >= deadline {
            return found;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn child_names(trace: &ThreadTraceData) -> Vec<String> {
    trace.root.children.iter().map(|c| c.name.to_string()).collect()
}

#[test]
fn test_internal_trace_tree() {
    let (agent, memory) = agent_with_traces(&[("Checkout", ThreadTraceConfig::new())]);

    {
        let _checkout = agent.start_timer("Checkout");
        {
            let _db = agent.start_timer("Checkout.db");
            let _query = agent.start_timer("Checkout.db.query");
        }
        let _render = agent.start_timer("Render");
    }

    let found = wait_for_traces(&memory, 1);
    assert_eq!(found.len(), 1);
    let trace = &found[0];
    assert_eq!(trace.monitor_name(), "Checkout");
    assert!(!trace.overflow);
    assert_eq!(child_names(trace), vec!["Checkout.db", "Render"]);
    assert!(trace.root.find("Checkout.db.query").is_some());
    assert_eq!(trace.root.element_count(), 4);

    agent.deinit();
}

#[test]
fn test_max_depth_ignores_deeper_checkpoints() {
    let (agent, memory) =
        agent_with_traces(&[("Deep", ThreadTraceConfig::new().with_max_depth(1))]);

    {
        let _root = agent.start_timer("Deep");
        let _child = agent.start_timer("Deep.a");
        let _grandchild = agent.start_timer("Deep.a.b");
    }

    let found = wait_for_traces(&memory, 1);
    assert_eq!(found.len(), 1);
    assert_eq!(child_names(&found[0]), vec!["Deep.a"]);
    assert!(found[0].root.children[0].children.is_empty());
    assert_eq!(found[0].ignored_checkpoints, 1);

    agent.deinit();
}

#[test]
fn test_short_traces_discarded() {
    let (agent, memory) = agent_with_traces(&[
        ("Slow", ThreadTraceConfig::new().with_min_duration(60_000)),
        ("Marker", ThreadTraceConfig::new()),
    ]);

    agent.start_timer("Slow").stop();
    agent.start_timer("Marker").stop();

    let found = wait_for_traces(&memory, 1);
    let roots: Vec<&str> = found.iter().map(|t| t.monitor_name()).collect();
    assert_eq!(roots, vec!["Marker"]);

    agent.deinit();
}

#[test]
fn test_thread_name_trigger() {
    let trigger = TraceTrigger::ThreadName {
        name: "traced-worker".to_string(),
    };
    let (agent, memory) =
        agent_with_traces(&[("Job", ThreadTraceConfig::new().with_trigger(trigger))]);
    let agent = Arc::new(agent);
    assert_eq!(agent.trigger_counts().thread_name, 1);

    // Test threads carry the test's name, so this one never matches
    agent.start_timer("Job").stop();

    let worker = Arc::clone(&agent);
    std::thread::Builder::new()
        .name("traced-worker".to_string())
        .spawn(move || worker.start_timer("Job").stop())
        .unwrap()
        .join()
        .unwrap();

    let found = wait_for_traces(&memory, 1);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].thread_name.as_deref(), Some("traced-worker"));

    agent.deinit();
}

#[test]
fn test_request_parameter_trigger() {
    let trigger = TraceTrigger::HttpRequestParameter {
        name: "perfmon".to_string(),
        value: "trace".to_string(),
    };
    let (agent, memory) =
        agent_with_traces(&[("Servlet", ThreadTraceConfig::new().with_trigger(trigger))]);
    assert!(agent.trigger_counts().needs_request_context());

    with_trigger_context(TriggerContext::new().with_parameter("perfmon", "off"), || {
        agent.start_timer("Servlet").stop();
    });
    with_trigger_context(TriggerContext::new().with_parameter("perfmon", "trace"), || {
        let _servlet = agent.start_timer("Servlet");
        let _dao = agent.start_timer("Servlet.dao");
    });

    let found = wait_for_traces(&memory, 1);
    assert_eq!(found.len(), 1);
    assert_eq!(child_names(&found[0]), vec!["Servlet.dao"]);

    agent.deinit();
}

#[test]
fn test_external_trace_request() {
    let agent = PerfMon::new(RuntimeFlags::default()).unwrap();
    let node = agent.monitor("Lookup").unwrap();

    let receiver = node.schedule_external_trace();
    assert_eq!(node.pending_external_traces(), 1);

    {
        let _lookup = agent.start_timer("Lookup");
        let _cache = agent.start_timer("Lookup.cache");
    }

    let trace = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(trace.monitor_name(), "Lookup");
    assert_eq!(child_names(&trace), vec!["Lookup.cache"]);
    assert_eq!(node.pending_external_traces(), 0);

    // One-shot: the next call is not traced
    agent.start_timer("Lookup").stop();
    assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());

    agent.deinit();
}

#[test]
fn test_reconfigure_removes_trace() {
    let (agent, memory) = agent_with_traces(&[("Once", ThreadTraceConfig::new())]);
    assert!(agent.monitor("Once").unwrap().thread_trace_config().is_some());

    let report = agent.configure(&PerfMonConfig::new());
    assert!(report.is_clean());
    assert!(agent.monitor("Once").unwrap().thread_trace_config().is_none());
    assert!(agent.appender(TRACES).is_none());

    agent.start_timer("Once").stop();
    std::thread::sleep(Duration::from_millis(100));
    assert!(traces(&memory).is_empty());

    agent.deinit();
}
