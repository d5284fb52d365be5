//! §4.9 Result Reporter: synchronous attempt first, hybrid-store
//! caching on failure, drained by a 30-second background ticker.

use crate::command::{CommandResultReport, StrategyExecReport};
use crate::wire::WireClient;
use classifyd_core::store::HybridStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

const RETRY_INTERVAL: Duration = Duration::from_secs(30);

pub struct ResultReporter {
    client: Arc<WireClient>,
    user_agent: Box<dyn Fn() -> String + Send + Sync>,
    command_store: Arc<HybridStore<CommandResultReport>>,
    policy_store: Arc<HybridStore<StrategyExecReport>>,
    stop: Notify,
    running: AtomicBool,
}

impl ResultReporter {
    pub fn new(
        client: Arc<WireClient>,
        user_agent: impl Fn() -> String + Send + Sync + 'static,
        command_store: Arc<HybridStore<CommandResultReport>>,
        policy_store: Arc<HybridStore<StrategyExecReport>>,
    ) -> Self {
        Self {
            client,
            user_agent: Box::new(user_agent),
            command_store,
            policy_store,
            stop: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub async fn report_command_result(&self, report: CommandResultReport) {
        let ua = (self.user_agent)();
        let body = match serde_json::to_vec(&report) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize command result report");
                return;
            }
        };

        if let Err(e) = self.client.post_command_result(&ua, &body).await {
            tracing::warn!(error = %e, cmd_id = %report.cmd_id, "command result post failed, caching for retry");
            if let Err(e) = self.command_store.push(report).await {
                tracing::error!(error = %e, "failed to cache command result for retry");
            }
        }
    }

    pub async fn report_policy_result(&self, report: StrategyExecReport) {
        let ua = (self.user_agent)();
        let body = match serde_json::to_vec(&report) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize policy result report");
                return;
            }
        };

        if let Err(e) = self.client.post_policy_result(&ua, &body).await {
            tracing::warn!(error = %e, module = %report.module, "policy result post failed, caching for retry");
            if let Err(e) = self.policy_store.push(report).await {
                tracing::error!(error = %e, "failed to cache policy result for retry");
            }
        }
    }

    /// §5: an owned background task the caller must join on shutdown
    /// before calling [`Self::flush`], so the flush sees the final
    /// buffered state.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(RETRY_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.drain_once().await,
                _ = self.stop.notified() => break,
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Flushes both cached-report stores' in-memory buffers to disk, so
    /// a report still below the spill threshold at shutdown survives
    /// to the next start instead of being dropped with the process.
    pub async fn flush(&self) {
        if let Err(e) = self.command_store.flush_memory_to_disk().await {
            tracing::error!(error = %e, "failed to flush command result store");
        }
        if let Err(e) = self.policy_store.flush_memory_to_disk().await {
            tracing::error!(error = %e, "failed to flush policy result store");
        }
    }

    async fn drain_once(&self) {
        match self.command_store.pop_all().await {
            Ok(pending) => {
                for report in pending {
                    self.report_command_result(report).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "draining command result store failed"),
        }

        match self.policy_store.pop_all().await {
            Ok(pending) => {
                for report in pending {
                    self.report_policy_result(report).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "draining policy result store failed"),
        }
    }
}
