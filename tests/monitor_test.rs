/*!
 * Monitor Tests
 * Window accounting, re-entrancy, activation and concurrency tracking
 */

use perfmon::config::{RegistryLockStrategy, TrackerMode};
use perfmon::core::now_millis;
use perfmon::monitor::sql_time;
use perfmon::{MonitorRegistry, PerfMonTimer, RuntimeFlags};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

fn registry() -> MonitorRegistry {
    MonitorRegistry::new(RuntimeFlags::default())
}

#[test]
fn test_external_element_window() {
    let registry = registry();
    let node = registry.get_or_create("Orders").unwrap();
    let slot = node.add_external_element().unwrap();
    let t0 = node.start_time().unwrap();

    for (i, duration) in [10, 20, 30, 40, 50].into_iter().enumerate() {
        let start = t0 + i as i64 * 100;
        PerfMonTimer::start_at(&node, start).stop_at(start + duration);
    }

    let interval = node.take_external_element(slot).unwrap();
    assert_eq!(interval.monitor_name(), "Orders");
    assert_eq!(interval.total_hits(), 5);
    assert_eq!(interval.total_completions(), 5);
    assert_eq!(interval.total_duration(), 150);
    assert_eq!(interval.min_duration(), 10);
    assert_eq!(interval.max_duration(), 50);
    assert!((interval.average_duration() - 30.0).abs() < f64::EPSILON);

    // Taking the slot opens a fresh window
    let next = node.take_external_element(slot).unwrap();
    assert_eq!(next.total_completions(), 0);
    assert_eq!(node.lifetime().total_completions(), 5);
}

#[test]
fn test_inactive_monitor_records_nothing() {
    let registry = registry();
    let node = registry.get_or_create("Idle").unwrap();
    assert!(!node.is_active());

    PerfMonTimer::start(&node).stop();
    assert_eq!(node.total_hits(), 0);
    assert_eq!(node.lifetime().total_completions(), 0);
    assert_eq!(node.active_thread_count(), 0);
}

#[test]
fn test_min_max_never_sentinel() {
    let registry = registry();
    let node = registry.get_or_create("Fresh").unwrap();
    node.add_external_element().unwrap();
    assert!(node.min_duration() >= 0);
    assert!(node.max_duration() >= 0);
}

#[test]
fn test_reentrant_calls_counted_once() {
    let registry = registry();
    let node = registry.get_or_create("Recursive").unwrap();
    node.add_external_element().unwrap();
    let t0 = node.start_time().unwrap();

    let outer = PerfMonTimer::start_at(&node, t0);
    let inner = PerfMonTimer::start_at(&node, t0 + 5);
    assert_eq!(node.current_thread_depth(), 2);
    assert_eq!(node.active_thread_count(), 1);
    inner.stop_at(t0 + 10);
    outer.stop_at(t0 + 25);

    assert_eq!(node.total_hits(), 1);
    assert_eq!(node.total_completions(), 1);
    assert_eq!(node.max_duration(), 25);
    assert_eq!(node.current_thread_depth(), 0);
}

#[test]
fn test_event_spanning_reactivation_dropped() {
    let registry = registry();
    let node = registry.get_or_create("Flapping").unwrap();
    let slot = node.add_external_element().unwrap();
    let t0 = node.start_time().unwrap();

    PerfMonTimer::start_at(&node, t0).stop_at(t0 + 12);
    assert!(node.remove_external_element(slot));
    assert!(!node.is_active());
    assert_eq!(node.total_completions(), 0);
    assert_eq!(node.lifetime().total_completions(), 1);

    // Started before the node was reactivated
    let early = now_millis() - 1_000;
    let timer = PerfMonTimer::start_at(&node, early);
    node.add_external_element().unwrap();
    timer.stop();

    assert_eq!(node.total_completions(), 0);
    assert_eq!(node.lifetime().total_completions(), 1);
}

#[test]
fn test_sql_time_per_event() {
    let registry = MonitorRegistry::new(RuntimeFlags::default().with_sql_time(true));
    let node = registry.get_or_create("Dao").unwrap();
    node.add_external_element().unwrap();

    let timer = PerfMonTimer::start(&node);
    sql_time::record(7);
    sql_time::record(5);
    timer.stop();

    let window = node.window();
    assert_eq!(window.sql().total(), 12);
    assert_eq!(window.sql().max(), 12);
}

#[test]
fn test_count_only_tracker() {
    let flags = RuntimeFlags::default().with_tracker_mode(TrackerMode::CountOnly);
    let registry = MonitorRegistry::new(flags);
    let node = registry.get_or_create("Counted").unwrap();
    node.add_external_element().unwrap();

    let timer = PerfMonTimer::start(&node);
    assert_eq!(node.active_thread_count(), 1);
    assert!(node.longest_running().is_none());
    timer.stop();
    assert_eq!(node.active_thread_count(), 0);
    assert_eq!(node.total_completions(), 1);
}

#[test]
fn test_exclusive_registry_lock() {
    let flags = RuntimeFlags::default().with_registry_lock(RegistryLockStrategy::Exclusive);
    let registry = Arc::new(MonitorRegistry::new(flags));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let node = registry.get_or_create(&format!("Svc.op{}", i % 2)).unwrap();
                node.name().to_string()
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let names: Vec<String> = registry
        .all_nodes()
        .iter()
        .map(|n| n.name().to_string())
        .collect();
    assert_eq!(names, vec!["<ROOT>", "Svc", "Svc.op0", "Svc.op1"]);
}

#[test]
fn test_active_threads_across_threads() {
    let registry = registry();
    let node = registry.get_or_create("Pool").unwrap();
    node.add_external_element().unwrap();

    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let node = Arc::clone(&node);
            let ready = ready_tx.clone();
            let release = Arc::clone(&release_rx);
            thread::spawn(move || {
                let timer = PerfMonTimer::start(&node);
                ready.send(()).unwrap();
                release.lock().recv().unwrap();
                timer.stop();
            })
        })
        .collect();

    for _ in 0..3 {
        ready_rx.recv().unwrap();
    }
    assert_eq!(node.active_thread_count(), 3);
    assert_eq!(node.tracker().all_running().len(), 3);

    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(node.active_thread_count(), 0);
    assert_eq!(node.total_completions(), 3);
    assert_eq!(node.window().max_active_threads(), 3);
}

struct Holder {
    start: i64,
    release: mpsc::Sender<()>,
    done: mpsc::Receiver<()>,
}

fn hold(node: &Arc<perfmon::MonitorNode>, start: i64) -> Holder {
    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let node = Arc::clone(node);
    thread::spawn(move || {
        let timer = PerfMonTimer::start_at(&node, start);
        ready_tx.send(()).unwrap();
        let _ = release_rx.recv();
        timer.stop();
        let _ = done_tx.send(());
    });
    ready_rx.recv().unwrap();
    Holder {
        start,
        release: release_tx,
        done: done_rx,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_longest_running_is_earliest_start(
        steps in prop::collection::vec((0i64..50, any::<bool>()), 1..6)
    ) {
        let registry = registry();
        let node = registry.get_or_create("Prop").unwrap();
        node.add_external_element().unwrap();

        // Threads arrive in start order, as they do in real time
        let mut start = now_millis() - 10_000;
        let mut holders = Vec::new();
        for (delta, _) in &steps {
            start += delta;
            holders.push(hold(&node, start));
        }

        let mut remaining = Vec::new();
        for (holder, (_, release)) in holders.into_iter().zip(&steps) {
            if *release {
                holder.release.send(()).unwrap();
                holder.done.recv().unwrap();
            } else {
                remaining.push(holder);
            }
        }

        let expected = remaining.iter().map(|h| h.start).min();
        let actual = node.longest_running().map(|r| r.start);
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(node.active_thread_count() as usize, remaining.len());

        for holder in remaining {
            holder.release.send(()).unwrap();
            holder.done.recv().unwrap();
        }
        prop_assert_eq!(node.active_thread_count(), 0);
    }
}
