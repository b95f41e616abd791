//! Chain client abstraction and the per-chain range scanner.

pub mod block_range;
pub mod retry;
pub mod rpc;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::error::IndexerResult;

pub use block_range::{RangeScanner, ScanState, ScanStatus};
pub use retry::RetryPolicy;
pub use rpc::AlloyChainClient;

/// Inclusive block range currently being processed by a scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: u64,
    pub end: u64,
}

impl std::fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Read access to an EVM JSON-RPC endpoint.
///
/// Every failure is reported as [`crate::error::IndexerError::Transient`];
/// retries are the caller's concern.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number (`eth_blockNumber`).
    async fn block_number(&self) -> IndexerResult<u64>;

    /// Logs of `address` whose topic 0 is `event_signature`, in `[from, to]`.
    async fn get_logs(
        &self,
        address: Address,
        event_signature: B256,
        from: u64,
        to: u64,
    ) -> IndexerResult<Vec<Log>>;

    /// Timestamp of a block, in unix seconds.
    async fn block_timestamp(&self, block: u64) -> IndexerResult<u64>;

    /// Drops long-lived resources (subscriptions, sockets). Called once the
    /// scanner owning the client has stopped.
    fn release(&self) {}
}
