//! FeesCollected log decoder
//!
//! Turns raw `eth_getLogs` entries into fee event candidates. The block
//! timestamp is attached afterwards, once the scanner knows it.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};

use crate::error::{IndexerError, IndexerResult};
use crate::etl::store::FeeEvent;

sol! {
    /// Emitted by the FeeCollector contract every time fees are collected.
    #[derive(Debug, PartialEq, Eq)]
    event FeesCollected(
        address indexed token,
        address indexed integrator,
        uint256 integratorFee,
        uint256 lifiFee
    );
}

/// Topic 0 of `FeesCollected`.
pub const FEES_COLLECTED_SIGNATURE: B256 = FeesCollected::SIGNATURE_HASH;

/// A decoded `FeesCollected` log, not yet bound to a chain or a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFee {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub token: Address,
    pub integrator: Address,
    pub integrator_fee: alloy::primitives::U256,
    pub lifi_fee: alloy::primitives::U256,
    /// Present when the endpoint returns `blockTimestamp` with the log.
    pub block_timestamp: Option<u64>,
}

impl DecodedFee {
    /// Builds the stored form of the event.
    pub fn into_event(self, chain_id: u64, timestamp: u64) -> IndexerResult<FeeEvent> {
        let transaction_hash = alloy::hex::encode_prefixed(self.transaction_hash);
        let timestamp = unix_to_datetime(timestamp).ok_or_else(|| IndexerError::MalformedLog {
            block_number: Some(self.block_number),
            transaction_hash: Some(transaction_hash.clone()),
            reason: format!("block timestamp {timestamp} out of range"),
        })?;

        Ok(FeeEvent {
            chain_id,
            block_number: self.block_number,
            transaction_hash,
            token: self.token.to_checksum(None),
            integrator: self.integrator.to_checksum(None),
            integrator_fee: self.integrator_fee.to_string(),
            lifi_fee: self.lifi_fee.to_string(),
            timestamp,
        })
    }
}

pub(crate) fn unix_to_datetime(seconds: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(seconds).ok()?, 0)
}

/// Decodes one log.
///
/// Fails with [`IndexerError::MalformedLog`] if the topics or the data do not
/// match `FeesCollected`, or if the log is missing its block number or
/// transaction hash (pending logs).
pub fn decode_fee_log(log: &Log) -> IndexerResult<DecodedFee> {
    let malformed = |reason: String| IndexerError::MalformedLog {
        block_number: log.block_number,
        transaction_hash: log.transaction_hash.map(alloy::hex::encode_prefixed),
        reason,
    };

    let block_number = log
        .block_number
        .ok_or_else(|| malformed("missing block number".to_string()))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or_else(|| malformed("missing transaction hash".to_string()))?;

    let event = FeesCollected::decode_log_data(log.data())
        .map_err(|e| malformed(format!("not a FeesCollected log: {e}")))?;

    Ok(DecodedFee {
        block_number,
        transaction_hash,
        token: event.token,
        integrator: event.integrator,
        integrator_fee: event.integratorFee,
        lifi_fee: event.lifiFee,
        block_timestamp: log.block_timestamp,
    })
}
