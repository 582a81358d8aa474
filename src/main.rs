/*!
 * PerfMon - Demo Entry Point
 *
 * Loads a JSON configuration (or a built-in one), configures the agent,
 * runs a synthetic workload and prints the intervals through the text
 * appender.
 *
 * Usage: perfmon [config.json] [seconds]
 */

use anyhow::{Context, Result};
use perfmon::appender::TEXT_APPENDER;
use perfmon::{
    init_tracing, AppenderDefinition, MonitorDefinition, PerfMon, PerfMonConfig, RuntimeFlags,
    ThreadTraceConfig,
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

fn builtin_config() -> PerfMonConfig {
    PerfMonConfig::new()
        .with_appender(
            AppenderDefinition::new("console", TEXT_APPENDER)
                .with_interval(Duration::from_secs(5))
                .with_options(serde_json::json!({ "target": "stdout" })),
        )
        .with_monitor(
            MonitorDefinition::new("Orders")
                .with_appender("console", "./*")
                .with_thresholds(vec![20, 50])
                .with_active_thread_thresholds(vec![40]),
        )
        .with_thread_trace(
            "Orders.checkout",
            ThreadTraceConfig::new()
                .with_min_duration(30)
                .with_appender("console"),
        )
}

fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PerfMonConfig::from_json_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => builtin_config(),
    };
    let run_for = args
        .next()
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("run time must be a number of seconds")?
        .unwrap_or(12);

    let agent = PerfMon::init_global_with(RuntimeFlags::from_env()).context("starting agent")?;
    let report = agent.configure(&config);
    if !report.is_clean() {
        warn!(
            problems = report.problems.len(),
            fallback = ?report.fallback_monitors,
            "Configuration applied with problems"
        );
    }
    info!(
        appenders = report.appenders,
        monitors = report.monitors,
        seconds = run_for,
        "Running workload"
    );

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let deadline = Instant::now() + Duration::from_secs(run_for);
            std::thread::Builder::new()
                .name(format!("worker-{}", worker))
                .spawn(move || workload(agent, worker, deadline))
        })
        .collect::<std::io::Result<_>>()
        .context("spawning workers")?;

    for worker in workers {
        if worker.join().is_err() {
            warn!("Worker thread panicked");
        }
    }

    agent.flush_appenders();
    agent.deinit();
    Ok(())
}

fn workload(agent: &PerfMon, worker: u64, deadline: Instant) {
    // Deterministic jitter so runs are comparable
    let mut step = worker;
    while Instant::now() < deadline {
        step = step.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let _order = agent.start_timer("Orders.checkout");
        {
            let _pricing = agent.start_timer("Orders.checkout.pricing");
            std::thread::sleep(Duration::from_millis(2 + (step >> 33) % 18));
        }
        let _inventory = agent.start_dynamic_timer("Orders.inventory");
        std::thread::sleep(Duration::from_millis(5 + (step >> 40) % 35));
    }
}
