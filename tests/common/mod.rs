//! Test doubles shared by the scanner integration tests.

#![allow(dead_code)]

use alloy::primitives::{address, Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use feescan::etl::decoder::FeesCollected;
use feescan::etl::store::{EventStore, FeeEvent, FeeEventQuery};
use feescan::{ChainConfig, IndexerError, IndexerResult, ScanSettings};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const FEE_COLLECTOR: &str = "0xbD6C7B0d2f68c2b7805d88388319cfB6EcB50eA9";
pub const TOKEN: Address = address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174");
pub const INTEGRATOR: Address = address!("1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE");

pub fn chain(chain_id: u64, start_block: u64, block_range: u64) -> ChainConfig {
    ChainConfig {
        chain_id,
        name: format!("test-{chain_id}"),
        rpc_url: "http://localhost:8545".to_string(),
        contract_address: FEE_COLLECTOR.to_string(),
        start_block,
        scanning: ScanSettings {
            block_range,
            retry_attempts: 2,
            retry_delay_ms: 1,
            polling_interval_ms: 20,
        },
    }
}

pub fn tx_hash(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

/// A well-formed FeesCollected log.
pub fn fee_log(block_number: u64, tx: B256, integrator_fee: u64) -> Log {
    let event = FeesCollected {
        token: TOKEN,
        integrator: INTEGRATOR,
        integratorFee: U256::from(integrator_fee),
        lifiFee: U256::from(1u64),
    };
    Log {
        inner: alloy::primitives::Log {
            address: address!("bD6C7B0d2f68c2b7805d88388319cfB6EcB50eA9"),
            data: event.encode_log_data(),
        },
        block_number: Some(block_number),
        transaction_hash: Some(tx),
        block_timestamp: Some(1_700_000_000 + block_number),
        ..Default::default()
    }
}

/// A log carrying the right topic but truncated data.
pub fn malformed_log(block_number: u64, tx: B256) -> Log {
    let mut log = fee_log(block_number, tx, 0);
    let topics = log.inner.data.topics().to_vec();
    log.inner.data = alloy::primitives::LogData::new_unchecked(topics, vec![0u8; 3].into());
    log
}

/// Chain client answering from an in-memory script.
#[derive(Default)]
pub struct ScriptedClient {
    pub head: AtomicU64,
    logs: Mutex<BTreeMap<u64, Vec<Log>>>,
    head_failures: AtomicUsize,
    log_failures: AtomicUsize,
    pub ranges: Mutex<Vec<(u64, u64)>>,
    pub head_calls: AtomicUsize,
    pub timestamp_calls: AtomicUsize,
    pub released: AtomicBool,
    /// When set, `get_logs` signals `entered` then waits on `gate`.
    hold: AtomicBool,
    pub entered: Notify,
    pub gate: Notify,
    overrides: Mutex<HashMap<(u64, u64), VecDeque<Vec<Log>>>>,
}

impl ScriptedClient {
    pub fn with_head(head: u64) -> Arc<Self> {
        let client = Self::default();
        client.head.store(head, Ordering::SeqCst);
        Arc::new(client)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_log(&self, log: Log) {
        let block = log.block_number.unwrap_or_default();
        self.logs.lock().unwrap().entry(block).or_default().push(log);
    }

    /// Next `get_logs` of exactly `[from, to]` returns `logs` instead of the script.
    pub fn override_once(&self, from: u64, to: u64, logs: Vec<Log>) {
        self.overrides
            .lock()
            .unwrap()
            .entry((from, to))
            .or_default()
            .push_back(logs);
    }

    pub fn fail_head(&self, times: usize) {
        self.head_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_logs(&self, times: usize) {
        self.log_failures.store(times, Ordering::SeqCst);
    }

    pub fn hold_logs(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl feescan::etl::ChainClient for ScriptedClient {
    async fn block_number(&self) -> IndexerResult<u64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.head_failures) {
            return Err(IndexerError::transient("eth_blockNumber", "connection reset"));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(
        &self,
        _address: Address,
        _event_signature: B256,
        from: u64,
        to: u64,
    ) -> IndexerResult<Vec<Log>> {
        self.ranges.lock().unwrap().push((from, to));

        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }

        if Self::take_failure(&self.log_failures) {
            return Err(IndexerError::transient("eth_getLogs", "timeout"));
        }

        if let Some(logs) = self
            .overrides
            .lock()
            .unwrap()
            .get_mut(&(from, to))
            .and_then(VecDeque::pop_front)
        {
            return Ok(logs);
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .range(from..=to)
            .flat_map(|(_, logs)| logs.clone())
            .collect())
    }

    async fn block_timestamp(&self, block: u64) -> IndexerResult<u64> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        Ok(1_600_000_000 + block)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Event store keeping rows in a map, with optional failure injection.
#[derive(Default)]
pub struct MemoryEventStore {
    rows: Mutex<BTreeMap<(u64, u64, String), FeeEvent>>,
    pub insert_calls: AtomicUsize,
    failures: AtomicUsize,
}

impl MemoryEventStore {
    pub fn all(&self) -> Vec<FeeEvent> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn fail_inserts(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_if_absent(&self, events: &[FeeEvent]) -> anyhow::Result<u64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if ScriptedClient::take_failure(&self.failures) {
            anyhow::bail!("database is locked");
        }

        let mut rows = self.rows.lock().unwrap();
        let mut inserted = 0;
        for event in events {
            let key = (
                event.chain_id,
                event.block_number,
                event.transaction_hash.clone(),
            );
            if let std::collections::btree_map::Entry::Vacant(slot) = rows.entry(key) {
                slot.insert(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count_matching(&self, query: &FeeEventQuery) -> anyhow::Result<u64> {
        Ok(self.find_matching(query, 0, u64::MAX).await?.len() as u64)
    }

    async fn find_matching(
        &self,
        query: &FeeEventQuery,
        skip: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<FeeEvent>> {
        let mut events: Vec<FeeEvent> = self
            .all()
            .into_iter()
            .filter(|e| e.chain_id == query.chain_id)
            .filter(|e| query.integrator.as_ref().map_or(true, |i| &e.integrator == i))
            .collect();
        events.sort_by_key(|e| (e.timestamp, e.block_number, e.transaction_hash.clone()));
        if query.newest_first {
            events.reverse();
        }
        Ok(events
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }
}
