//! HTTP server implementation.
//!
//! Provides the core `/health` endpoint and the CORS policy shared by every
//! route. Storage crates add their own routes through `IndexerConfig::with_routes`.

use axum::{
    extract::State,
    http::{header, request, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::etl::extractor::ChainClient;
use crate::etl::store::CheckpointStore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Chain whose RPC endpoint is probed by `/health`.
#[derive(Clone)]
pub struct ChainProbe {
    pub chain_id: u64,
    pub name: String,
    pub client: Arc<dyn ChainClient>,
}

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    pub version: String,
    pub startup_time: i64,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub chains: Vec<ChainProbe>,
    pub probe_timeout: Duration,
}

impl HttpState {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, chains: Vec<ChainProbe>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            startup_time: chrono::Utc::now().timestamp(),
            checkpoints,
            chains,
            probe_timeout: PROBE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub status: HealthStatus,
    pub connected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHealth {
    pub status: HealthStatus,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServicesHealth {
    pub api: ServiceHealth,
    pub database: DatabaseHealth,
    /// Keyed by chain id.
    pub chains: BTreeMap<String, ChainHealth>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub services: ServicesHealth,
}

async fn check_database(state: &HttpState) -> DatabaseHealth {
    match state.checkpoints.ping().await {
        Ok(()) => DatabaseHealth {
            status: HealthStatus::Ok,
            connected: true,
        },
        Err(err) => {
            tracing::error!(target: "feescan::http", "Database health check failed: {:#}", err);
            DatabaseHealth {
                status: HealthStatus::Error,
                connected: false,
            }
        }
    }
}

async fn check_chain(probe: &ChainProbe, timeout: Duration) -> ChainHealth {
    let result = match tokio::time::timeout(timeout, probe.client.block_number()).await {
        Ok(Ok(head)) => Ok(head),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("no response within {timeout:?}")),
    };

    match result {
        Ok(head) => ChainHealth {
            status: HealthStatus::Ok,
            name: probe.name.clone(),
            latest_block: Some(head),
            error: None,
        },
        Err(error) => {
            tracing::error!(
                target: "feescan::http",
                chain = %probe.name,
                chain_id = probe.chain_id,
                "Chain health check failed: {}",
                error
            );
            ChainHealth {
                status: HealthStatus::Error,
                name: probe.name.clone(),
                latest_block: None,
                error: Some(error),
            }
        }
    }
}

/// Health check endpoint. 200 when the database and every chain respond, 503 otherwise.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (database, chains) = futures::join!(
        check_database(&state),
        join_all(
            state
                .chains
                .iter()
                .map(|probe| check_chain(probe, state.probe_timeout))
        )
    );

    let chains: BTreeMap<String, ChainHealth> = state
        .chains
        .iter()
        .map(|probe| probe.chain_id.to_string())
        .zip(chains)
        .collect();

    let healthy = database.status == HealthStatus::Ok
        && chains.values().all(|chain| chain.status == HealthStatus::Ok);
    let status = if healthy {
        HealthStatus::Ok
    } else {
        HealthStatus::Error
    };

    let now = chrono::Utc::now();
    let response = HealthResponse {
        status,
        timestamp: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        version: state.version.clone(),
        uptime_seconds: now.timestamp() - state.startup_time,
        services: ServicesHealth {
            api: ServiceHealth {
                status: HealthStatus::Ok,
            },
            database,
            chains,
        },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}

/// Create the core HTTP router with basic endpoints.
pub fn create_http_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::new(state))
}

/// Builds the CORS policy from a comma separated origin list.
///
/// `*` alone allows every origin. Entries containing `*` match any run of
/// characters at that position (`https://*.example.com`).
pub fn cors_layer(origins: &str) -> CorsLayer {
    let patterns: Vec<String> = origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect();

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &request::Parts| {
        origin
            .to_str()
            .map(|origin| patterns.iter().any(|pattern| origin_matches(pattern, origin)))
            .unwrap_or(false)
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86_400))
}

fn origin_matches(pattern: &str, origin: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == origin;
    }

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = origin.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}
