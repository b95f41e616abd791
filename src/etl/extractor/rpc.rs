//! alloy-backed chain client over HTTP.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::time::Duration;
use url::Url;

use super::ChainClient;
use crate::error::{IndexerError, IndexerResult};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ChainClient`] talking JSON-RPC over HTTP, every call bounded by a timeout.
#[derive(Debug, Clone)]
pub struct AlloyChainClient {
    provider: RootProvider,
    timeout: Duration,
}

impl AlloyChainClient {
    pub fn new(url: Url) -> Self {
        Self {
            provider: RootProvider::new_http(url),
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call<T, E, F>(&self, operation: &'static str, fut: F) -> IndexerResult<T>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(IndexerError::transient(operation, err)),
            Err(elapsed) => Err(IndexerError::transient(operation, elapsed)),
        }
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn block_number(&self) -> IndexerResult<u64> {
        self.call("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn get_logs(
        &self,
        address: Address,
        event_signature: B256,
        from: u64,
        to: u64,
    ) -> IndexerResult<Vec<Log>> {
        let filter = Filter::new()
            .address(address)
            .event_signature(event_signature)
            .from_block(from)
            .to_block(to);

        self.call("eth_getLogs", self.provider.get_logs(&filter))
            .await
    }

    async fn block_timestamp(&self, block: u64) -> IndexerResult<u64> {
        let response = self
            .call(
                "eth_getBlockByNumber",
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(block)),
            )
            .await?;

        response
            .map(|block| block.header.timestamp)
            .ok_or_else(|| {
                IndexerError::transient("eth_getBlockByNumber", format!("block {block} not found"))
            })
    }
}
