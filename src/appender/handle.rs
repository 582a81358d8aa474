/*!
 * Appender Handle
 *
 * Named, configured appender instance as seen by the dispatch core. Wraps the
 * sink with optional asynchronous delivery: a bounded lock-free queue drained
 * by a dedicated flush timer. When the queue is full the newest item is
 * dropped so producers (timer threads) never block.
 */

use super::data::PerfMonData;
use super::traits::Appender;
use crate::config::AppenderDefinition;
use crate::core::Result;
use crate::scheduler::{CancelToken, TaskTimer, TimerHandle, TimerTask};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppenderStats {
    pub delivered: u64,
    pub dropped: u64,
    pub failures: u64,
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
}

struct AsyncDelivery {
    queue: ArrayQueue<PerfMonData>,
    timer: TaskTimer,
    token: Mutex<Option<CancelToken>>,
}

/// Configured appender instance
pub struct AppenderHandle {
    name: Arc<str>,
    definition: AppenderDefinition,
    sink: Arc<dyn Appender>,
    delivery: Option<AsyncDelivery>,
    counters: Counters,
}

impl fmt::Debug for AppenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppenderHandle")
            .field("name", &self.name)
            .field("kind", &self.definition.kind)
            .field("interval", &self.interval())
            .field("async", &self.delivery.is_some())
            .finish()
    }
}

impl AppenderHandle {
    /// Wrap `sink`; async definitions get their own queue and flush timer
    pub fn new(definition: AppenderDefinition, sink: Arc<dyn Appender>) -> Result<Arc<Self>> {
        let delivery = match definition.async_queue {
            Some(queue) => Some(AsyncDelivery {
                queue: ArrayQueue::new(queue.capacity.max(1)),
                timer: TaskTimer::new(&format!("appender-{}", definition.name))?,
                token: Mutex::new(None),
            }),
            None => None,
        };
        let flush_every = definition
            .async_queue
            .map(|q| Duration::from_millis(q.flush_interval_millis.max(1)));

        let handle = Arc::new(Self {
            name: Arc::from(definition.name.as_str()),
            definition,
            sink,
            delivery,
            counters: Counters::default(),
        });

        if let (Some(delivery), Some(period)) = (&handle.delivery, flush_every) {
            let task = Arc::new(FlushQueueTask {
                name: format!("flush-{}", handle.name),
                appender: Arc::downgrade(&handle),
            });
            let token = delivery
                .timer
                .handle()
                .schedule_at_fixed_rate(task, period, period)?;
            *delivery.token.lock() = Some(token);
        }

        Ok(handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn kind(&self) -> &str {
        &self.definition.kind
    }

    pub fn interval(&self) -> Duration {
        self.definition.interval()
    }

    pub fn definition(&self) -> &AppenderDefinition {
        &self.definition
    }

    pub fn sink(&self) -> &Arc<dyn Appender> {
        &self.sink
    }

    pub fn is_async(&self) -> bool {
        self.delivery.is_some()
    }

    /// Deliver `data`, directly or through the async queue
    pub fn append(&self, data: PerfMonData) {
        match &self.delivery {
            None => self.output(&data),
            Some(delivery) => {
                if let Err(dropped) = delivery.queue.push(data) {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        appender = %self.name,
                        source = dropped.source_name(),
                        capacity = delivery.queue.capacity(),
                        "Async appender queue full, dropping newest data"
                    );
                }
            }
        }
    }

    /// Drain the async queue and flush the sink
    pub fn flush(&self) {
        self.drain();
        if let Err(e) = self.sink.flush() {
            warn!(appender = %self.name, error = %e, "Appender flush failed");
        }
    }

    /// Stop the flush timer and deliver whatever is still queued
    pub fn deinit(&self) {
        if let Some(delivery) = &self.delivery {
            if let Some(token) = delivery.token.lock().take() {
                token.cancel();
            }
            delivery.timer.shutdown();
        }
        self.flush();
        debug!(appender = %self.name, "Appender deinitialized");
    }

    pub fn stats(&self) -> AppenderStats {
        AppenderStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            queued: self.delivery.as_ref().map_or(0, |d| d.queue.len()),
        }
    }

    fn drain(&self) {
        let Some(delivery) = &self.delivery else {
            return;
        };
        while let Some(data) = delivery.queue.pop() {
            self.output(&data);
        }
    }

    fn output(&self, data: &PerfMonData) {
        match self.sink.output_data(data) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    appender = %self.name,
                    source = data.source_name(),
                    error = %e,
                    "Appender failed to output data"
                );
            }
        }
    }
}

/// Periodic drain of an async appender's queue
struct FlushQueueTask {
    name: String,
    appender: Weak<AppenderHandle>,
}

impl TimerTask for FlushQueueTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Arc<Self>, _timer: &TimerHandle) -> Result<()> {
        if let Some(appender) = self.appender.upgrade() {
            appender.drain();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::data::SnapShotData;
    use crate::appender::traits::MockAppender;
    use crate::config::AsyncQueueConfig;
    use crate::core::AppenderError;

    fn snapshot(name: &str) -> PerfMonData {
        PerfMonData::SnapShot(SnapShotData::new(name, 0))
    }

    #[test]
    fn test_sync_delivery_counts_failures() {
        let mut mock = MockAppender::new();
        mock.expect_output_data()
            .times(2)
            .returning(|data| match data.source_name() {
                "bad" => Err(AppenderError::Output("disk full".to_string())),
                _ => Ok(()),
            });

        let handle =
            AppenderHandle::new(AppenderDefinition::new("sync", "mock"), Arc::new(mock)).unwrap();
        handle.append(snapshot("good"));
        handle.append(snapshot("bad"));

        let stats = handle.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_async_queue_drops_newest_when_full() {
        let mut mock = MockAppender::new();
        mock.expect_output_data().times(2).returning(|_| Ok(()));
        mock.expect_flush().returning(|| Ok(()));

        // Long flush period so nothing drains until deinit
        let definition = AppenderDefinition::new("async", "mock").with_async_queue(AsyncQueueConfig {
            capacity: 2,
            flush_interval_millis: 60_000,
        });
        let handle = AppenderHandle::new(definition, Arc::new(mock)).unwrap();

        handle.append(snapshot("a"));
        handle.append(snapshot("b"));
        handle.append(snapshot("c"));

        let stats = handle.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped, 1);

        handle.deinit();
        let stats = handle.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.delivered, 2);
    }

    #[test]
    fn test_async_flush_timer_drains() {
        let mut mock = MockAppender::new();
        mock.expect_output_data().times(1).returning(|_| Ok(()));
        mock.expect_flush().returning(|| Ok(()));

        let definition = AppenderDefinition::new("drain", "mock").with_async_queue(AsyncQueueConfig {
            capacity: 8,
            flush_interval_millis: 5,
        });
        let handle = AppenderHandle::new(definition, Arc::new(mock)).unwrap();
        handle.append(snapshot("a"));

        let mut drained = false;
        for _ in 0..200 {
            if handle.stats().delivered == 1 {
                drained = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(drained);
        handle.deinit();
    }
}
