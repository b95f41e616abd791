//! Block range scanner for one chain
//!
//! Walks the chain from the stored cursor to the head in windows of at most
//! `block_range` blocks, stores the `FeesCollected` logs of every window and
//! then advances the cursor. Once caught up it polls the head.
//!
//! # Cursor Management
//!
//! The cursor is the last block whose window was fully stored. On restart,
//! scanning resumes from cursor + 1, or from the configured start block when
//! no cursor exists yet. Events are always written before the cursor moves, so
//! a crash between the two replays the window and the duplicates are ignored
//! by the event store.
//!
//! # Stopping
//!
//! A stop request is honoured between windows and cuts polling or penalty
//! sleeps short. A window in flight is always finished first.

use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{ChainClient, RetryPolicy, ScanWindow};
use crate::config::ChainConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::etl::decoder::{decode_fee_log, DecodedFee, FEES_COLLECTED_SIGNATURE};
use crate::etl::store::{CheckpointStore, EventStore};
use crate::metrics::Metrics;

/// Wait after a failed iteration before retrying the same window.
pub const DEFAULT_PENALTY_DELAY: Duration = Duration::from_secs(10);

/// Upper bound of `stop()` waiting for the in-flight window.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Observable state of a scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanState {
    pub status: ScanStatus,
    /// Window currently being fetched or stored.
    pub window: Option<ScanWindow>,
}

/// Resumable scanner of a single chain.
///
/// The scanner is the only writer of its chain's cursor and events.
pub struct RangeScanner {
    chain: ChainConfig,
    contract: Address,
    client: Arc<dyn ChainClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
    retry: RetryPolicy,
    penalty_delay: Duration,
    stop_timeout: Duration,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    state: watch::Sender<ScanState>,
}

impl RangeScanner {
    /// Creates a scanner. The chain configuration is validated here.
    pub fn new(
        chain: ChainConfig,
        client: Arc<dyn ChainClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventStore>,
    ) -> IndexerResult<Self> {
        let (_, contract) = chain.validate()?;
        let retry = RetryPolicy::from_settings(&chain.scanning);
        let (state, _) = watch::channel(ScanState {
            status: ScanStatus::Idle,
            window: None,
        });

        Ok(Self {
            chain,
            contract,
            client,
            checkpoints,
            events,
            retry,
            penalty_delay: DEFAULT_PENALTY_DELAY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            state,
        })
    }

    pub fn with_penalty_delay(mut self, delay: Duration) -> Self {
        self.penalty_delay = delay;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current state snapshot.
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Receiver notified on every status or window change.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Runs the scan loop until stopped. No-op if the scanner is already running.
    pub async fn start(&self) {
        let Some(token) = self.claim() else {
            tracing::info!(
                target: "feescan::etl::scanner",
                chain = %self.chain.name,
                chain_id = self.chain.chain_id,
                "Scanner already running"
            );
            return;
        };

        self.run_claimed(token).await;
    }

    /// Marks the scanner as running and resets the stop request.
    ///
    /// Returns `None` when it is already running.
    pub(crate) fn claim(&self) -> Option<CancellationToken> {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }

        *cancel = CancellationToken::new();
        self.state.send_replace(ScanState {
            status: ScanStatus::Running,
            window: None,
        });

        Some(cancel.clone())
    }

    /// Runs the loop of a scanner previously claimed with [`Self::claim`].
    pub(crate) async fn run_claimed(&self, token: CancellationToken) {
        Metrics::init(self.chain.chain_id);
        tracing::info!(
            target: "feescan::etl::scanner",
            chain = %self.chain.name,
            chain_id = self.chain.chain_id,
            contract = %self.contract,
            block_range = self.chain.scanning.block_range,
            "Scanner started"
        );

        self.scan(&token).await;

        self.running.store(false, Ordering::SeqCst);
        self.state.send_modify(|state| {
            state.status = ScanStatus::Stopped;
            state.window = None;
        });

        tracing::info!(
            target: "feescan::etl::scanner",
            chain = %self.chain.name,
            chain_id = self.chain.chain_id,
            "Scan loop exited"
        );
    }

    /// Requests termination and waits, up to the stop timeout, for the window in
    /// flight to be stored. Releases the RPC client afterwards.
    pub async fn stop(&self) {
        let was_running = {
            let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            cancel.cancel();
            self.running.load(Ordering::SeqCst)
        };

        if was_running {
            self.state.send_if_modified(|state| {
                if state.status == ScanStatus::Running {
                    state.status = ScanStatus::Stopping;
                    true
                } else {
                    false
                }
            });

            tracing::info!(
                target: "feescan::etl::scanner",
                chain = %self.chain.name,
                chain_id = self.chain.chain_id,
                window = ?self.state().window,
                "Stopping scanner"
            );

            let mut rx = self.subscribe();
            let exited = matches!(
                tokio::time::timeout(
                    self.stop_timeout,
                    rx.wait_for(|state| state.status == ScanStatus::Stopped),
                )
                .await,
                Ok(Ok(_))
            );

            if !exited {
                tracing::warn!(
                    target: "feescan::etl::scanner",
                    chain = %self.chain.name,
                    chain_id = self.chain.chain_id,
                    window = ?self.state().window,
                    "Scanner did not stop within {:?}, abandoning in-flight window",
                    self.stop_timeout
                );
            }
        }

        self.state.send_if_modified(|state| state.window.take().is_some());
        self.client.release();

        tracing::info!(
            target: "feescan::etl::scanner",
            chain = %self.chain.name,
            chain_id = self.chain.chain_id,
            "Scanner stopped"
        );
    }

    async fn scan(&self, token: &CancellationToken) {
        let Some(mut resume) = self.resume_point(token).await else {
            return;
        };

        tracing::info!(
            target: "feescan::etl::scanner",
            chain = %self.chain.name,
            chain_id = self.chain.chain_id,
            "Scanning from block {}",
            resume
        );

        while !token.is_cancelled() {
            let head = match self
                .retry
                .execute("eth_blockNumber", move || self.client.block_number())
                .await
            {
                Ok(head) => head,
                Err(err) => {
                    self.report(&err, None);
                    if !self.pause(token, self.penalty_delay).await {
                        break;
                    }
                    continue;
                }
            };
            Metrics::record_head(self.chain.chain_id, head);

            if resume > head {
                tracing::debug!(
                    target: "feescan::etl::scanner",
                    chain = %self.chain.name,
                    chain_id = self.chain.chain_id,
                    head,
                    "Caught up with chain head"
                );
                if !self.pause(token, self.chain.scanning.polling_interval()).await {
                    break;
                }
                continue;
            }

            let end = resume
                .saturating_add(self.chain.scanning.block_range - 1)
                .min(head);
            let window = ScanWindow { start: resume, end };
            self.state.send_modify(|state| state.window = Some(window));

            let started = Instant::now();
            let result = self.process_window(window).await;
            self.state.send_modify(|state| state.window = None);

            match result {
                Ok(inserted) => {
                    Metrics::record_range(self.chain.chain_id, end, inserted, started.elapsed());
                    tracing::info!(
                        target: "feescan::etl::scanner",
                        chain = %self.chain.name,
                        chain_id = self.chain.chain_id,
                        inserted,
                        head,
                        "Stored blocks {}",
                        window
                    );
                    resume = end + 1;
                }
                Err(err) => {
                    self.report(&err, Some(window));
                    if token.is_cancelled() || !self.pause(token, self.penalty_delay).await {
                        break;
                    }
                }
            }
        }
    }

    /// Block the loop starts from. `None` when stopped before the cursor could be read.
    async fn resume_point(&self, token: &CancellationToken) -> Option<u64> {
        loop {
            match self.checkpoints.get_cursor(self.chain.chain_id).await {
                Ok(Some(cursor)) => return Some(cursor.saturating_add(1)),
                Ok(None) => return Some(self.chain.start_block),
                Err(err) => {
                    self.report(&IndexerError::storage(err), None);
                    if !self.pause(token, self.penalty_delay).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Fetches, decodes and stores one window, then commits the cursor.
    ///
    /// Returns the number of newly inserted events.
    async fn process_window(&self, window: ScanWindow) -> IndexerResult<u64> {
        let contract = self.contract;
        let logs = self
            .retry
            .execute("eth_getLogs", move || {
                self.client
                    .get_logs(contract, FEES_COLLECTED_SIGNATURE, window.start, window.end)
            })
            .await?;

        let decoded = logs
            .iter()
            .map(decode_fee_log)
            .collect::<IndexerResult<Vec<DecodedFee>>>()?;

        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut events = Vec::with_capacity(decoded.len());
        for fee in decoded {
            let timestamp = match fee.block_timestamp {
                Some(timestamp) => timestamp,
                None => self.block_timestamp(fee.block_number, &mut timestamps).await?,
            };
            events.push(fee.into_event(self.chain.chain_id, timestamp)?);
        }

        let inserted = self
            .events
            .insert_if_absent(&events)
            .await
            .map_err(IndexerError::storage)?;

        self.checkpoints
            .set_cursor(self.chain.chain_id, window.end)
            .await
            .map_err(IndexerError::storage)?;

        Ok(inserted)
    }

    async fn block_timestamp(
        &self,
        block: u64,
        cache: &mut HashMap<u64, u64>,
    ) -> IndexerResult<u64> {
        if let Some(timestamp) = cache.get(&block) {
            return Ok(*timestamp);
        }

        let timestamp = self
            .retry
            .execute("eth_getBlockByNumber", move || {
                self.client.block_timestamp(block)
            })
            .await?;
        cache.insert(block, timestamp);

        Ok(timestamp)
    }

    /// Sleeps unless a stop is requested first. Returns `false` when stopped.
    async fn pause(&self, token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            () = token.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    fn report(&self, err: &IndexerError, window: Option<ScanWindow>) {
        Metrics::record_error(self.chain.chain_id, err.kind());

        match err {
            IndexerError::MalformedLog { .. } => tracing::error!(
                target: "feescan::etl::scanner",
                chain = %self.chain.name,
                chain_id = self.chain.chain_id,
                window = ?window,
                "Range rejected, will retry: {}",
                err
            ),
            IndexerError::Transient { .. } | IndexerError::Storage(_) => tracing::error!(
                target: "feescan::etl::scanner",
                chain = %self.chain.name,
                chain_id = self.chain.chain_id,
                window = ?window,
                kind = err.kind(),
                "Scan iteration failed, retrying in {:?}: {}",
                self.penalty_delay,
                err
            ),
            IndexerError::Config(_) => tracing::error!(
                target: "feescan::etl::scanner",
                chain = %self.chain.name,
                chain_id = self.chain.chain_id,
                "Unexpected configuration error: {}",
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanSettings;
    use async_trait::async_trait;

    struct NoopClient;

    #[async_trait]
    impl ChainClient for NoopClient {
        async fn block_number(&self) -> IndexerResult<u64> {
            Ok(0)
        }

        async fn get_logs(
            &self,
            _: Address,
            _: alloy::primitives::B256,
            _: u64,
            _: u64,
        ) -> IndexerResult<Vec<alloy::rpc::types::Log>> {
            Ok(Vec::new())
        }

        async fn block_timestamp(&self, _: u64) -> IndexerResult<u64> {
            Ok(0)
        }
    }

    struct NoopStore;

    #[async_trait]
    impl CheckpointStore for NoopStore {
        async fn get_cursor(&self, _: u64) -> anyhow::Result<Option<u64>> {
            Ok(None)
        }

        async fn set_cursor(&self, _: u64, _: u64) -> anyhow::Result<()> {
            Ok(())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl EventStore for NoopStore {
        async fn insert_if_absent(&self, _: &[crate::etl::store::FeeEvent]) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn count_matching(&self, _: &crate::etl::store::FeeEventQuery) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn find_matching(
            &self,
            _: &crate::etl::store::FeeEventQuery,
            _: u64,
            _: u64,
        ) -> anyhow::Result<Vec<crate::etl::store::FeeEvent>> {
            Ok(Vec::new())
        }
    }

    fn chain() -> ChainConfig {
        ChainConfig {
            chain_id: 137,
            name: "Polygon".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "0xbD6C7B0d2f68c2b7805d88388319cfB6EcB50eA9".to_string(),
            start_block: 10,
            scanning: ScanSettings::default(),
        }
    }

    fn scanner(chain: ChainConfig) -> IndexerResult<RangeScanner> {
        let store = Arc::new(NoopStore);
        RangeScanner::new(chain, Arc::new(NoopClient), store.clone(), store)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut bad = chain();
        bad.scanning.block_range = 0;
        assert!(matches!(scanner(bad), Err(IndexerError::Config(_))));
    }

    #[test]
    fn test_initial_state_is_idle() {
        let scanner = scanner(chain()).unwrap();
        assert_eq!(
            scanner.state(),
            ScanState {
                status: ScanStatus::Idle,
                window: None
            }
        );
        assert!(!scanner.is_running());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let scanner = scanner(chain()).unwrap();
        let token = scanner.claim().unwrap();
        assert!(scanner.claim().is_none());
        assert!(!token.is_cancelled());
        assert_eq!(scanner.state().status, ScanStatus::Running);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let scanner = scanner(chain()).unwrap();
        scanner.stop().await;
        assert_eq!(scanner.state().status, ScanStatus::Idle);
    }
}
