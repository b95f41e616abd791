//! Per-chain scanner configuration and its validation.

use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{IndexerError, IndexerResult};

pub const DEFAULT_BLOCK_RANGE: u64 = 5000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 10_000;

/// Scanning knobs of a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettings {
    /// Maximum number of blocks fetched by a single `eth_getLogs` call.
    pub block_range: u64,
    /// Total tries of every RPC call (first try included).
    pub retry_attempts: u32,
    /// Base delay of the linear retry backoff, in milliseconds.
    pub retry_delay_ms: u64,
    /// Sleep between head checks once caught up, in milliseconds.
    pub polling_interval_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            block_range: DEFAULT_BLOCK_RANGE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
        }
    }
}

impl ScanSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Configuration of one scanned chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    /// FeeCollector contract emitting the watched event.
    pub contract_address: String,
    pub start_block: u64,
    #[serde(default)]
    pub scanning: ScanSettings,
}

impl ChainConfig {
    /// Checks every field and returns the parsed RPC URL and contract address.
    pub fn validate(&self) -> IndexerResult<(Url, Address)> {
        let url = parse_rpc_url(&self.rpc_url).ok_or_else(|| {
            IndexerError::config(format!("Invalid RPC URL for chain {}", self.chain_id))
        })?;
        let address = parse_address(&self.contract_address).ok_or_else(|| {
            IndexerError::config(format!(
                "Invalid fee collector address for chain {}",
                self.chain_id
            ))
        })?;

        let scanning = &self.scanning;
        if scanning.block_range == 0 {
            return Err(IndexerError::config(format!(
                "Invalid block range for chain {}",
                self.chain_id
            )));
        }
        if scanning.retry_attempts == 0 {
            return Err(IndexerError::config(format!(
                "Invalid retry attempts for chain {}",
                self.chain_id
            )));
        }
        if scanning.retry_delay_ms == 0 {
            return Err(IndexerError::config(format!(
                "Invalid retry delay for chain {}",
                self.chain_id
            )));
        }
        if scanning.polling_interval_ms == 0 {
            return Err(IndexerError::config(format!(
                "Invalid polling interval for chain {}",
                self.chain_id
            )));
        }

        Ok((url, address))
    }
}

/// Validates a whole chain list: non-empty, unique ids, every entry valid.
pub fn validate_chains(chains: &[ChainConfig]) -> IndexerResult<()> {
    if chains.is_empty() {
        return Err(IndexerError::config("No chains configured"));
    }

    let mut seen = HashSet::with_capacity(chains.len());
    for chain in chains {
        if !seen.insert(chain.chain_id) {
            return Err(IndexerError::config(format!(
                "Chain {} configured more than once",
                chain.chain_id
            )));
        }
        chain.validate()?;
    }

    Ok(())
}

fn parse_rpc_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Parses a hex address the way wallets do: all-lowercase or all-uppercase
/// input is accepted as is, mixed case must carry a valid EIP-55 checksum.
pub fn parse_address(raw: &str) -> Option<Address> {
    let address = Address::from_str(raw).ok()?;
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && Address::parse_checksummed(raw, None).is_err() {
        return None;
    }
    Some(address)
}
