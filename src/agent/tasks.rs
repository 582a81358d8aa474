/*!
 * Agent Maintenance Tasks
 * Utility-timer housekeeping
 */

use crate::core::{now_millis, Result};
use crate::monitor::MonitorRegistry;
use crate::scheduler::{TimerHandle, TimerTask};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Drops external thread-trace requests nobody fulfilled in time
pub(crate) struct ExternalTraceCleanupTask {
    registry: Weak<MonitorRegistry>,
    timeout: Duration,
}

impl ExternalTraceCleanupTask {
    pub(crate) fn new(registry: &Arc<MonitorRegistry>, timeout: Duration) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            timeout,
        }
    }
}

impl TimerTask for ExternalTraceCleanupTask {
    fn name(&self) -> &str {
        "external-trace-cleanup"
    }

    fn run(self: Arc<Self>, _timer: &TimerHandle) -> Result<()> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let now = now_millis();
        for node in registry.all_nodes() {
            if node.pending_external_traces() == 0 {
                continue;
            }
            let expired = node.expire_external_requests(now, self.timeout);
            if expired > 0 {
                debug!(monitor = node.name(), expired, "Expired external thread trace requests");
            }
        }
        Ok(())
    }
}
