//! Scanner supervisor
//!
//! Runs one [`RangeScanner`] per configured chain, each on its own task.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::extractor::RangeScanner;

/// Time a scanner task gets to finish once its `stop()` returned.
pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(5);

pub struct ScannerSupervisor {
    scanners: Vec<Arc<RangeScanner>>,
    handles: Vec<(u64, JoinHandle<()>)>,
    reap_grace: Duration,
}

impl ScannerSupervisor {
    pub fn new(scanners: Vec<Arc<RangeScanner>>) -> Self {
        Self {
            scanners,
            handles: Vec::new(),
            reap_grace: DEFAULT_REAP_GRACE,
        }
    }

    pub fn with_reap_grace(mut self, grace: Duration) -> Self {
        self.reap_grace = grace;
        self
    }

    pub fn scanners(&self) -> &[Arc<RangeScanner>] {
        &self.scanners
    }

    /// Spawns every scanner that is not running yet. Returns once all tasks are spawned.
    pub fn start(&mut self) {
        for scanner in &self.scanners {
            let Some(token) = scanner.claim() else {
                tracing::info!(
                    target: "feescan::etl::supervisor",
                    chain = %scanner.chain_name(),
                    chain_id = scanner.chain_id(),
                    "Scanner already running"
                );
                continue;
            };

            let task_scanner = scanner.clone();
            let handle = tokio::spawn(async move { task_scanner.run_claimed(token).await });
            self.handles.push((scanner.chain_id(), handle));
        }

        tracing::info!(
            target: "feescan::etl::supervisor",
            "Started {} chain scanner(s)",
            self.handles.len()
        );
    }

    /// Stops every scanner concurrently and waits for their tasks.
    ///
    /// A task still running after the reap grace period is left detached.
    pub async fn stop_all(&mut self) {
        tracing::info!(
            target: "feescan::etl::supervisor",
            "Stopping {} chain scanner(s)",
            self.scanners.len()
        );

        join_all(self.scanners.iter().map(|scanner| scanner.stop())).await;

        for (chain_id, handle) in self.handles.drain(..) {
            match tokio::time::timeout(self.reap_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(
                    target: "feescan::etl::supervisor",
                    chain_id,
                    "Scanner task failed: {}",
                    err
                ),
                Err(_) => tracing::warn!(
                    target: "feescan::etl::supervisor",
                    chain_id,
                    "Scanner task still running after {:?}, detaching",
                    self.reap_grace
                ),
            }
        }

        tracing::info!(target: "feescan::etl::supervisor", "All chain scanners stopped");
    }
}
