//! feescan - FeesCollected indexer
//!
//! Scans the FeeCollector contract of one or more EVM chains, stores every
//! `FeesCollected` event once and serves them over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Polygon only, SQLite databases under ./feescan-data
//! CHAIN_137_RPC_URL=https://polygon-rpc.com \
//! CHAIN_137_FEE_COLLECTOR_ADDRESS=0xbD6C7B0d2f68c2b7805d88388319cfB6EcB50eA9 \
//! CHAIN_137_START_BLOCK=61500000 \
//! feescan
//!
//! # Several chains, PostgreSQL, Prometheus metrics on :9100
//! feescan --chain-ids 137,42161 --database-url postgres://localhost/feescan --metrics-port 9100
//! ```

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use feescan_fees::{events_router, FeeStorage};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("Failed to load .env");
        }
    }

    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!(target: "feescan::main", "Starting feescan");

    let chains = config.chains()?;
    feescan::config::validate_chains(&chains)?;

    for chain in &chains {
        tracing::info!(
            target: "feescan::main",
            chain = %chain.name,
            chain_id = chain.chain_id,
            contract = %chain.contract_address,
            start_block = chain.start_block,
            block_range = chain.scanning.block_range,
            "Chain configured"
        );
    }

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!(target: "feescan::main", "Metrics exporter listening on {}", addr);
    }

    // Create storage
    let fees_db = config.database_url.clone().unwrap_or_else(|| {
        Path::new(&config.db_dir)
            .join("fees.db")
            .to_string_lossy()
            .to_string()
    });
    let storage = Arc::new(FeeStorage::new(&fees_db).await?);
    tracing::info!(target: "feescan::main", "Fees database initialized");

    let mut builder = feescan::IndexerConfig::builder()
        .host(config.host.clone())
        .port(config.port)
        .chains(chains)
        .enable_api(config.enable_api)
        .cors_origin(config.cors_origin.clone())
        .database_root(&config.db_dir)
        .event_store(storage.clone())
        .with_routes(events_router(storage.clone()))
        .rpc_timeout(Duration::from_secs(config.rpc_timeout))
        .shutdown_timeout(config.shutdown_timeout);

    if let Some(url) = &config.database_url {
        builder = builder.database_url(url.clone());
    }

    let result = feescan::run(builder.build()).await;

    storage.close().await;

    result
}
