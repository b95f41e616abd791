//! feescan - FeesCollected indexer for EVM chains.
//!
//! Scans the FeeCollector contract of every configured chain in block ranges,
//! stores each `FeesCollected` event exactly once and serves them over HTTP.
//! Storage backends and API routes are plugged in by the binary.

pub mod config;
pub mod error;
pub mod etl;
pub mod http;
pub mod metrics;

// Re-export commonly used types for storage crates
pub use async_trait::async_trait;
pub use axum;
pub use tokio;

pub use config::{ChainConfig, ScanSettings};
pub use error::{IndexerError, IndexerResult};

use anyhow::Context;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use etl::extractor::{AlloyChainClient, ChainClient, RangeScanner};
use etl::store::{CheckpointStore, EventStore};
use etl::{EngineDb, ScannerSupervisor};
use http::{cors_layer, create_http_router, ChainProbe, HttpState};

/// Configuration of the indexer process.
pub struct IndexerConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host to bind to.
    pub host: String,

    /// Chains to scan. Validated by [`run`].
    pub chains: Vec<ChainConfig>,

    /// Serve the HTTP API. When false only the scanners run.
    pub enable_api: bool,

    /// Comma separated allowed origins, `*` for any.
    pub cors_origin: String,

    /// Root directory for SQLite databases.
    pub database_root: PathBuf,

    /// Engine database URL (e.g. `postgres://...`). Overrides `database_root`.
    pub database_url: Option<String>,

    /// Store receiving the scanned events.
    pub event_store: Option<Arc<dyn EventStore>>,

    /// Extra routes merged into the HTTP router.
    pub routes: Vec<Router>,

    /// Chain clients by chain id, replacing the default HTTP client.
    pub clients: HashMap<u64, Arc<dyn ChainClient>>,

    /// Timeout of every RPC call of the default client.
    pub rpc_timeout: Duration,

    /// Graceful shutdown timeout in seconds (default: 30).
    ///
    /// Bounds the wait of each scanner for its in-flight range to be stored.
    pub shutdown_timeout: u64,

    /// Cancelled to shut down without an OS signal.
    pub shutdown_token: CancellationToken,
}

impl IndexerConfig {
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }
}

/// Builder for IndexerConfig.
#[derive(Default)]
pub struct IndexerConfigBuilder {
    port: Option<u16>,
    host: Option<String>,
    chains: Vec<ChainConfig>,
    enable_api: Option<bool>,
    cors_origin: Option<String>,
    database_root: Option<PathBuf>,
    database_url: Option<String>,
    event_store: Option<Arc<dyn EventStore>>,
    routes: Vec<Router>,
    clients: HashMap<u64, Arc<dyn ChainClient>>,
    rpc_timeout: Option<Duration>,
    shutdown_timeout: Option<u64>,
    shutdown_token: Option<CancellationToken>,
}

impl IndexerConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn add_chain(mut self, chain: ChainConfig) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn chains(mut self, chains: Vec<ChainConfig>) -> Self {
        self.chains.extend(chains);
        self
    }

    pub fn enable_api(mut self, enable: bool) -> Self {
        self.enable_api = Some(enable);
        self
    }

    pub fn cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }

    pub fn database_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_root = Some(path.into());
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Merges routes into the HTTP router (e.g. the events API).
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes.push(routes);
        self
    }

    /// Uses `client` for the given chain instead of an HTTP client on its RPC URL.
    pub fn with_client(mut self, chain_id: u64, client: Arc<dyn ChainClient>) -> Self {
        self.clients.insert(chain_id, client);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    /// Sets the graceful shutdown timeout in seconds.
    pub fn shutdown_timeout(mut self, seconds: u64) -> Self {
        self.shutdown_timeout = Some(seconds);
        self
    }

    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    pub fn build(self) -> IndexerConfig {
        IndexerConfig {
            port: self.port.unwrap_or(3000),
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            chains: self.chains,
            enable_api: self.enable_api.unwrap_or(true),
            cors_origin: self.cors_origin.unwrap_or_else(|| "*".to_string()),
            database_root: self.database_root.unwrap_or_else(|| PathBuf::from(".")),
            database_url: self.database_url,
            event_store: self.event_store,
            routes: self.routes,
            clients: self.clients,
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or(etl::extractor::rpc::DEFAULT_RPC_TIMEOUT),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(30),
            shutdown_token: self.shutdown_token.unwrap_or_default(),
        }
    }
}

/// Waits for SIGINT, SIGTERM or the cancellation of `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "feescan::main", "Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(target: "feescan::main", "Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!(target: "feescan::main", "Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
        () = terminate => {
            tracing::info!(target: "feescan::main", "Received SIGTERM, initiating graceful shutdown...");
        }
        () = token.cancelled() => {
            tracing::info!(target: "feescan::main", "Shutdown requested, initiating graceful shutdown...");
        }
    }

    token.cancel();
}

/// Starts the scanners and the HTTP server, and runs until shutdown.
///
/// NOTE: The caller is responsible for initializing the tracing subscriber before calling this function.
///
/// Shutdown order: the HTTP server stops accepting requests, then every
/// scanner finishes its in-flight range, then the engine database is closed.
pub async fn run(config: IndexerConfig) -> anyhow::Result<()> {
    config::validate_chains(&config.chains)?;

    let events = config
        .event_store
        .clone()
        .ok_or_else(|| IndexerError::config("No event store configured"))?;

    tracing::info!(
        target: "feescan::main",
        "Starting feescan with {} chain(s)",
        config.chains.len()
    );

    let engine_db_path = match &config.database_url {
        Some(url) => url.clone(),
        None => config
            .database_root
            .join("engine.db")
            .to_string_lossy()
            .to_string(),
    };
    let engine_db = Arc::new(
        EngineDb::new(etl::EngineDbConfig {
            path: engine_db_path,
        })
        .await?,
    );
    let checkpoints: Arc<dyn CheckpointStore> = engine_db.clone();

    let mut scanners = Vec::with_capacity(config.chains.len());
    let mut probes = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let client: Arc<dyn ChainClient> = match config.clients.get(&chain.chain_id) {
            Some(client) => client.clone(),
            None => {
                let (url, _) = chain.validate()?;
                Arc::new(AlloyChainClient::new(url).with_timeout(config.rpc_timeout))
            }
        };

        tracing::info!(
            target: "feescan::main",
            chain = %chain.name,
            chain_id = chain.chain_id,
            start_block = chain.start_block,
            "Configured chain"
        );

        probes.push(ChainProbe {
            chain_id: chain.chain_id,
            name: chain.name.clone(),
            client: client.clone(),
        });
        scanners.push(Arc::new(
            RangeScanner::new(chain.clone(), client, checkpoints.clone(), events.clone())?
                .with_stop_timeout(Duration::from_secs(config.shutdown_timeout)),
        ));
    }

    // Bind first so a port conflict fails before any scanner is spawned
    let listener = if config.enable_api {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .context("Invalid listen address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind {addr}"))?;
        tracing::info!(target: "feescan::main", "Server listening on {}", addr);
        Some(listener)
    } else {
        None
    };

    let mut supervisor = ScannerSupervisor::new(scanners);
    supervisor.start();

    let shutdown_token = config.shutdown_token.clone();

    if let Some(listener) = listener {
        let mut app = create_http_router(HttpState::new(checkpoints.clone(), probes));
        for routes in config.routes {
            app = app.merge(routes);
        }
        let app = app.layer(cors_layer(&config.cors_origin));

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()));

        // Give active connections 15 seconds to close gracefully, then force shutdown.
        const SERVER_SHUTDOWN_TIMEOUT_SECS: u64 = 15;
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    tracing::error!(target: "feescan::main", "Server error: {}", e);
                }
            }
            () = async {
                shutdown_token.cancelled().await;
                tokio::time::sleep(Duration::from_secs(SERVER_SHUTDOWN_TIMEOUT_SECS)).await;
            } => {
                tracing::warn!(
                    target: "feescan::main",
                    "Server connections did not close within {}s, forcing shutdown",
                    SERVER_SHUTDOWN_TIMEOUT_SECS
                );
            }
        }

        tracing::info!(target: "feescan::main", "HTTP server stopped");
    } else {
        tracing::info!(target: "feescan::main", "API disabled, running scanners only");
        shutdown_signal(shutdown_token.clone()).await;
    }

    tracing::info!(target: "feescan::main", "Waiting for scanners to finish in-flight ranges...");

    // Each scanner bounds its own wait by the shutdown timeout, then releases its client
    supervisor.stop_all().await;

    engine_db.close().await;

    tracing::info!(target: "feescan::main", "feescan shutdown complete");

    Ok(())
}
