/*!
 * Task Timer
 *
 * Background timer thread running a current-thread tokio runtime. Tasks are
 * kept in a deadline heap and run one at a time on the timer thread.
 * Execution is fail-safe: an error or panic in one task is logged and never
 * stops the timer or cancels other tasks.
 */

use crate::core::{PerfMonError, Result};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Work scheduled on a timer
pub trait TimerTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Run once; may reschedule itself through `timer`
    fn run(self: Arc<Self>, timer: &TimerHandle) -> Result<()>;
}

/// Shared cancellation flag for a scheduled task
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    task: Arc<dyn TimerTask>,
    token: CancelToken,
    period: Option<Duration>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Earliest deadline first (min heap), FIFO among equal deadlines
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum TimerCommand {
    Schedule(Scheduled),
    Shutdown,
}

/// Cloneable scheduling handle
#[derive(Clone)]
pub struct TimerHandle {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<TimerCommand>,
    seq: Arc<AtomicU64>,
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").field("name", &self.name).finish()
    }
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `task` once after `delay`
    pub fn schedule(&self, task: Arc<dyn TimerTask>, delay: Duration) -> Result<CancelToken> {
        let token = CancelToken::new();
        self.schedule_with_token(task, delay, token.clone())?;
        Ok(token)
    }

    /// Run `task` once after `delay`, sharing an existing cancellation token
    pub fn schedule_with_token(
        &self,
        task: Arc<dyn TimerTask>,
        delay: Duration,
        token: CancelToken,
    ) -> Result<()> {
        self.send(task, delay, token, None)
    }

    /// Run `task` every `period`, first after `initial_delay`
    pub fn schedule_at_fixed_rate(
        &self,
        task: Arc<dyn TimerTask>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<CancelToken> {
        let token = CancelToken::new();
        self.send(task, initial_delay, token.clone(), Some(period.max(Duration::from_millis(1))))?;
        Ok(token)
    }

    fn send(
        &self,
        task: Arc<dyn TimerTask>,
        delay: Duration,
        token: CancelToken,
        period: Option<Duration>,
    ) -> Result<()> {
        let scheduled = Scheduled {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            task,
            token,
            period,
        };
        self.tx
            .send(TimerCommand::Schedule(scheduled))
            .map_err(|_| PerfMonError::TimerShutdown(self.name.to_string()))
    }
}

/// Owner of a background timer thread
pub struct TaskTimer {
    handle: TimerHandle,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TaskTimer {
    /// Spawn the timer thread
    pub fn new(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let handle = TimerHandle {
            name: Arc::from(name),
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        };

        let loop_handle = handle.clone();
        let thread = std::thread::Builder::new()
            .name(format!("perfmon-{}", name))
            .spawn(move || runtime.block_on(run_timer_loop(loop_handle, rx)))?;

        info!("Timer '{}' started", name);

        Ok(Self {
            handle,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> &TimerHandle {
        &self.handle
    }

    /// Stop the timer thread; pending tasks are dropped
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.handle.tx.send(TimerCommand::Shutdown);

        // A task shutting down its own timer cannot join itself
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            warn!("Timer '{}' thread ended with a panic", self.handle.name);
        }
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Core timer loop
async fn run_timer_loop(handle: TimerHandle, mut rx: mpsc::UnboundedReceiver<TimerCommand>) {
    let mut queue: BinaryHeap<Scheduled> = BinaryHeap::new();

    loop {
        let next = queue.peek().map(|s| s.deadline);

        tokio::select! {
            _ = sleep_until_next(next) => {
                run_due(&handle, &mut queue);
            }

            cmd = rx.recv() => {
                match cmd {
                    Some(TimerCommand::Schedule(scheduled)) => queue.push(scheduled),
                    Some(TimerCommand::Shutdown) | None => {
                        info!("Timer '{}' shutting down ({} pending tasks dropped)", handle.name, queue.len());
                        break;
                    }
                }
            }
        }
    }
}

fn run_due(handle: &TimerHandle, queue: &mut BinaryHeap<Scheduled>) {
    let now = Instant::now();

    while queue.peek().is_some_and(|s| s.deadline <= now) {
        let Some(mut scheduled) = queue.pop() else {
            break;
        };
        if scheduled.token.is_cancelled() {
            continue;
        }

        run_fail_safe(handle, &scheduled.task);

        if let Some(period) = scheduled.period {
            if scheduled.token.is_cancelled() {
                continue;
            }
            scheduled.deadline += period;
            if scheduled.deadline <= now {
                scheduled.deadline = now + period;
            }
            scheduled.seq = handle.seq.fetch_add(1, Ordering::Relaxed);
            queue.push(scheduled);
        }
    }
}

fn run_fail_safe(handle: &TimerHandle, task: &Arc<dyn TimerTask>) {
    match catch_unwind(AssertUnwindSafe(|| Arc::clone(task).run(handle))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            "Timer '{}' task '{}' failed: {}",
            handle.name,
            task.name(),
            e
        ),
        Err(_) => error!(
            "Timer '{}' task '{}' panicked; timer continues",
            handle.name,
            task.name()
        ),
    }
}
