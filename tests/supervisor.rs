mod common;

use common::{chain, fee_log, tx_hash, MemoryEventStore, ScriptedClient};
use feescan::etl::{EngineDb, EngineDbConfig, RangeScanner, ScanStatus, ScannerSupervisor};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

async fn memory_db() -> Arc<EngineDb> {
    Arc::new(
        EngineDb::new(EngineDbConfig {
            path: ":memory:".to_string(),
        })
        .await
        .unwrap(),
    )
}

#[tokio::test]
async fn test_chains_progress_independently() {
    let checkpoints = memory_db().await;
    let events = Arc::new(MemoryEventStore::default());

    let polygon = ScriptedClient::with_head(104);
    polygon.add_log(fee_log(101, tx_hash(1), 10));
    let optimism = ScriptedClient::with_head(9);
    optimism.add_log(fee_log(3, tx_hash(1), 20));
    optimism.add_log(fee_log(7, tx_hash(2), 30));

    let scanners = vec![
        Arc::new(
            RangeScanner::new(
                chain(137, 100, 5),
                polygon.clone(),
                checkpoints.clone(),
                events.clone(),
            )
            .unwrap(),
        ),
        Arc::new(
            RangeScanner::new(
                chain(10, 0, 5),
                optimism.clone(),
                checkpoints.clone(),
                events.clone(),
            )
            .unwrap(),
        ),
    ];

    let mut supervisor =
        ScannerSupervisor::new(scanners).with_reap_grace(Duration::from_secs(1));
    supervisor.start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let cursors = checkpoints.get_cursors().await.unwrap();
        if cursors.contains(&(137, 104)) && cursors.contains(&(10, 9)) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "scanners stalled: {cursors:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    supervisor.stop_all().await;

    for scanner in supervisor.scanners() {
        assert!(!scanner.is_running());
        assert_eq!(scanner.state().status, ScanStatus::Stopped);
    }
    assert!(polygon.released.load(Ordering::SeqCst));
    assert!(optimism.released.load(Ordering::SeqCst));

    assert_eq!(polygon.ranges(), vec![(100, 104)]);
    assert_eq!(optimism.ranges(), vec![(0, 4), (5, 9)]);

    let stored = events.all();
    assert_eq!(stored.len(), 3);
    let polygon_events: Vec<_> = stored.iter().filter(|e| e.chain_id == 137).collect();
    assert_eq!(polygon_events.len(), 1);
    assert_eq!(polygon_events[0].block_number, 101);
    assert_eq!(polygon_events[0].integrator_fee, "10");
    assert_eq!(stored.iter().filter(|e| e.chain_id == 10).count(), 2);
}

#[tokio::test]
async fn test_same_transaction_on_two_chains() {
    let checkpoints = memory_db().await;
    let events = Arc::new(MemoryEventStore::default());
    let mut scanners = Vec::new();
    for chain_id in [1, 8453] {
        let client = ScriptedClient::with_head(4);
        client.add_log(fee_log(2, tx_hash(42), chain_id));
        scanners.push(Arc::new(
            RangeScanner::new(chain(chain_id, 0, 5), client, checkpoints.clone(), events.clone())
                .unwrap(),
        ));
    }

    let mut supervisor = ScannerSupervisor::new(scanners);
    supervisor.start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while checkpoints.get_cursors().await.unwrap().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "scanners stalled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    supervisor.stop_all().await;

    let stored = events.all();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].transaction_hash, stored[1].transaction_hash);
    assert_ne!(stored[0].chain_id, stored[1].chain_id);
}

#[tokio::test]
async fn test_start_skips_running_scanners() {
    let checkpoints = memory_db().await;
    let events = Arc::new(MemoryEventStore::default());
    let client = ScriptedClient::with_head(0);

    let scanner = Arc::new(
        RangeScanner::new(chain(1, 10, 5), client.clone(), checkpoints, events).unwrap(),
    );
    let mut supervisor = ScannerSupervisor::new(vec![scanner.clone()]);

    supervisor.start();
    assert!(scanner.is_running());
    supervisor.start();

    tokio::time::timeout(Duration::from_secs(5), supervisor.stop_all())
        .await
        .expect("stop_all completes");
    assert!(!scanner.is_running());
    assert!(client.released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_all_without_start() {
    let client = ScriptedClient::with_head(0);
    let scanner = Arc::new(
        RangeScanner::new(
            chain(1, 0, 5),
            client.clone(),
            memory_db().await,
            Arc::new(MemoryEventStore::default()),
        )
        .unwrap(),
    );
    let mut supervisor = ScannerSupervisor::new(vec![scanner.clone()]);

    supervisor.stop_all().await;

    assert_eq!(scanner.state().status, ScanStatus::Idle);
    assert!(client.released.load(Ordering::SeqCst));
}
