//! HTTP API handlers for fee events
//!
//! `GET /api/:chain_id/events?page&limit&integrator` returns one page of events,
//! newest first, with pagination metadata.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use feescan::config::parse_address;
use feescan::etl::store::{EventStore, FeeEvent, FeeEventQuery};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

/// Shared state for the events routes
#[derive(Clone)]
pub struct EventsState {
    pub(crate) store: Arc<dyn EventStore>,
}

/// Raw query string. Values are parsed leniently, see [`Pagination::from_params`].
#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub integrator: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl Pagination {
    /// Page and limit of a request, with `total` left at zero.
    ///
    /// A missing page is 1; anything below 1 or unparseable becomes 1. A
    /// missing limit is 10; anything below 1 or unparseable becomes 1; limits
    /// above 100 are capped.
    pub fn from_params(params: &EventsParams) -> Self {
        let page = params
            .page
            .as_deref()
            .map_or(DEFAULT_PAGE, |raw| leading_int(raw).unwrap_or(1).max(1) as u64);
        let limit = params.limit.as_deref().map_or(DEFAULT_LIMIT, |raw| {
            leading_int(raw).unwrap_or(1).clamp(1, MAX_LIMIT as i64) as u64
        });

        Self {
            total: 0,
            page,
            limit,
            total_pages: 0,
        }
    }

    fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self.total_pages = total.div_ceil(self.limit);
        self
    }

    fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    pub data: Vec<FeeEvent>,
    pub pagination: Pagination,
}

/// Parses the leading integer of `raw` (`"12abc"` is 12), ignoring surrounding
/// whitespace. `None` when no digit leads.
fn leading_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// GET /:chain_id/events - Paginated fee events of a chain.
pub async fn events_handler(
    State(state): State<EventsState>,
    Path(chain_id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Response {
    let Some(chain_id) = leading_int(&chain_id).and_then(|id| u64::try_from(id).ok()) else {
        return error(StatusCode::BAD_REQUEST, "Invalid chain ID");
    };

    let mut query = FeeEventQuery::chain(chain_id);
    if let Some(raw) = params.integrator.as_deref().filter(|raw| !raw.is_empty()) {
        let Some(integrator) = parse_address(raw) else {
            return error(StatusCode::BAD_REQUEST, "Invalid integrator address format");
        };
        query = query.with_integrator(integrator.to_checksum(None));
    }

    let pagination = Pagination::from_params(&params);

    let result = tokio::try_join!(
        state.store.count_matching(&query),
        state
            .store
            .find_matching(&query, pagination.skip(), pagination.limit)
    );

    match result {
        Ok((total, data)) => Json(EventsResponse {
            data,
            pagination: pagination.with_total(total),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(target: "feescan_fees::api", "Error fetching events: {:#}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Events routes, to be merged into the main router.
pub fn events_router(store: Arc<dyn EventStore>) -> Router {
    Router::new().nest(
        "/api",
        Router::new()
            .route("/:chain_id/events", get(events_handler))
            .with_state(EventsState { store }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FeeStorage;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    const INTEGRATOR: &str = "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE";

    fn event(block_number: u64, integrator: &str) -> FeeEvent {
        FeeEvent {
            chain_id: 137,
            block_number,
            transaction_hash: format!("0x{block_number:064x}"),
            token: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".to_string(),
            integrator: integrator.to_string(),
            integrator_fee: "10".to_string(),
            lifi_fee: "1".to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + block_number as i64, 0).unwrap(),
        }
    }

    async fn app_with(events: &[FeeEvent]) -> Router {
        let storage = FeeStorage::new(":memory:").await.unwrap();
        storage.insert_if_absent(events).await.unwrap();
        events_router(Arc::new(storage))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_pagination_defaults_and_clamping() {
        let params = |page: Option<&str>, limit: Option<&str>| EventsParams {
            page: page.map(str::to_string),
            limit: limit.map(str::to_string),
            integrator: None,
        };

        let p = Pagination::from_params(&params(None, None));
        assert_eq!((p.page, p.limit), (1, 10));

        let p = Pagination::from_params(&params(Some("0"), Some("0")));
        assert_eq!((p.page, p.limit), (1, 1));

        let p = Pagination::from_params(&params(Some("-4"), Some("abc")));
        assert_eq!((p.page, p.limit), (1, 1));

        let p = Pagination::from_params(&params(Some("3"), Some("500")));
        assert_eq!((p.page, p.limit), (3, 100));

        let p = Pagination::from_params(&params(Some("2x"), Some("25.5")));
        assert_eq!((p.page, p.limit), (2, 25));
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let p = Pagination::from_params(&EventsParams::default()).with_total(21);
        assert_eq!(p.total_pages, 3);
        let p = Pagination::from_params(&EventsParams::default()).with_total(0);
        assert_eq!(p.total_pages, 0);
    }

    #[tokio::test]
    async fn test_list_events_newest_first() {
        let events: Vec<FeeEvent> = (1..=15).map(|block| event(block, INTEGRATOR)).collect();
        let app = app_with(&events).await;

        let (status, body) = get(app, "/api/137/events?page=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["pagination"],
            json!({"total": 15, "page": 2, "limit": 10, "totalPages": 2})
        );

        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 5);
        assert_eq!(data[0]["blockNumber"], 5);
        assert_eq!(data[0]["integratorFee"], "10");
        assert_eq!(data[4]["blockNumber"], 1);
    }

    #[tokio::test]
    async fn test_integrator_filter_is_normalised() {
        let app = app_with(&[
            event(1, INTEGRATOR),
            event(2, "0xbD6C7B0d2f68c2b7805d88388319cfB6EcB50eA9"),
        ])
        .await;

        let uri = format!("/api/137/events?integrator={}", INTEGRATOR.to_lowercase());
        let (status, body) = get(app, &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["integrator"], INTEGRATOR);
    }

    #[tokio::test]
    async fn test_page_past_the_end_is_empty() {
        let app = app_with(&[event(1, INTEGRATOR)]).await;
        let (status, body) = get(app, "/api/137/events?page=100000000000000000&limit=100").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["pagination"]["totalPages"], 1);
    }

    #[tokio::test]
    async fn test_invalid_chain_id() {
        let app = app_with(&[]).await;
        let (status, body) = get(app, "/api/polygon/events").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid chain ID"}));
    }

    #[tokio::test]
    async fn test_invalid_integrator() {
        let app = app_with(&[]).await;
        let (status, body) = get(app, "/api/137/events?integrator=0x1234").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid integrator address format"}));
    }

    #[tokio::test]
    async fn test_unknown_chain_is_empty() {
        let app = app_with(&[event(1, INTEGRATOR)]).await;
        let (status, body) = get(app, "/api/10/events").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["pagination"]["totalPages"], 0);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl EventStore for FailingStore {
        async fn insert_if_absent(&self, _: &[FeeEvent]) -> anyhow::Result<u64> {
            anyhow::bail!("unavailable")
        }

        async fn count_matching(&self, _: &FeeEventQuery) -> anyhow::Result<u64> {
            anyhow::bail!("unavailable")
        }

        async fn find_matching(
            &self,
            _: &FeeEventQuery,
            _: u64,
            _: u64,
        ) -> anyhow::Result<Vec<FeeEvent>> {
            anyhow::bail!("unavailable")
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let app = events_router(Arc::new(FailingStore));
        let (status, body) = get(app, "/api/137/events").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Internal server error"}));
    }
}
