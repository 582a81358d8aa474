/*!
 * Push Tasks
 * Priority-timer tasks that hand data to appenders
 */

use super::data::PerfMonData;
use super::handle::AppenderHandle;
use crate::core::{now_millis, Result};
use crate::monitor::MonitorNode;
use crate::scheduler::{round_interval, CancelToken, TimerHandle, TimerTask};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Periodic snapshot of one monitor for one appender.
///
/// Each run first reschedules itself for the next aligned boundary, then
/// closes the monitor's window for this appender and delivers it. Appender
/// failures are absorbed by the handle, so the chain never breaks.
pub(crate) struct PushAppenderDataTask {
    name: String,
    node: Weak<MonitorNode>,
    appender: Arc<AppenderHandle>,
    token: CancelToken,
}

impl PushAppenderDataTask {
    pub(crate) fn new(node: &Arc<MonitorNode>, appender: Arc<AppenderHandle>, token: CancelToken) -> Self {
        Self {
            name: format!("push-{}-{}", node.name(), appender.name()),
            node: Arc::downgrade(node),
            appender,
            token,
        }
    }

    /// Schedule the first run at the next aligned boundary
    pub(crate) fn schedule(self: Arc<Self>, timer: &TimerHandle) -> Result<()> {
        let delay = round_interval(now_millis(), self.appender.interval());
        let token = self.token.clone();
        timer.schedule_with_token(self, delay, token)
    }
}

impl TimerTask for PushAppenderDataTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Arc<Self>, timer: &TimerHandle) -> Result<()> {
        if self.token.is_cancelled() {
            return Ok(());
        }
        let Some(node) = self.node.upgrade() else {
            return Ok(());
        };

        let now = now_millis();
        Arc::clone(&self).schedule(timer)?;

        match node.snapshot_for(self.appender.name(), now) {
            Some(data) => {
                trace!(
                    monitor = node.name(),
                    appender = self.appender.name(),
                    completions = data.total_completions(),
                    "Pushing interval"
                );
                self.appender.append(PerfMonData::Interval(data));
            }
            // Detached between scheduling and running
            None => self.token.cancel(),
        }
        Ok(())
    }
}

/// One-shot delivery of a payload to a set of appenders
pub(crate) struct DeliverDataTask {
    name: String,
    appenders: Arc<[Arc<AppenderHandle>]>,
    data: PerfMonData,
}

impl DeliverDataTask {
    pub(crate) fn new(appenders: Arc<[Arc<AppenderHandle>]>, data: PerfMonData) -> Self {
        Self {
            name: format!("deliver-{}", data.source_name()),
            appenders,
            data,
        }
    }
}

impl TimerTask for DeliverDataTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Arc<Self>, _timer: &TimerHandle) -> Result<()> {
        for appender in self.appenders.iter() {
            appender.append(self.data.clone());
        }
        Ok(())
    }
}
