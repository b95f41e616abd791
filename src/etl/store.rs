//! Store contracts consumed by the scanners and the query API.
//!
//! Both stores are shared by every chain scanner of the process. Keys are
//! partitioned by chain id, so implementations only need the guarantees of
//! their own unique-key upserts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `FeesCollected` emission, in its stored form.
///
/// Identity key: `(chain_id, block_number, transaction_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEvent {
    pub chain_id: u64,
    pub block_number: u64,
    /// `0x`-prefixed lowercase hex.
    pub transaction_hash: String,
    /// EIP-55 checksummed token address.
    pub token: String,
    /// EIP-55 checksummed integrator address.
    pub integrator: String,
    /// Decimal string of a uint256.
    pub integrator_fee: String,
    /// Decimal string of a uint256.
    pub lifi_fee: String,
    /// Timestamp of the emitting block.
    pub timestamp: DateTime<Utc>,
}

/// Filter of the read-side queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEventQuery {
    pub chain_id: u64,
    /// Checksummed integrator address.
    pub integrator: Option<String>,
    /// Sort by timestamp descending (newest first).
    pub newest_first: bool,
}

impl FeeEventQuery {
    pub fn chain(chain_id: u64) -> Self {
        Self {
            chain_id,
            integrator: None,
            newest_first: true,
        }
    }

    pub fn with_integrator(mut self, integrator: impl Into<String>) -> Self {
        self.integrator = Some(integrator.into());
        self
    }
}

/// Durable progress marker per chain.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last fully processed block of the chain, if any range completed yet.
    async fn get_cursor(&self, chain_id: u64) -> Result<Option<u64>>;

    /// Upserts the cursor. Idempotent; a value lower than the stored one is ignored.
    async fn set_cursor(&self, chain_id: u64, block_number: u64) -> Result<()>;

    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<()>;
}

/// Idempotent storage of fee events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts every event whose identity key is not stored yet, atomically.
    ///
    /// Existing rows are never overwritten. Returns the number of new rows.
    async fn insert_if_absent(&self, events: &[FeeEvent]) -> Result<u64>;

    /// Number of events matching the query.
    async fn count_matching(&self, query: &FeeEventQuery) -> Result<u64>;

    /// One page of matching events, ordered by timestamp.
    async fn find_matching(
        &self,
        query: &FeeEventQuery,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<FeeEvent>>;
}
