//! FeesCollected event storage and query API.
//!
//! [`FeeStorage`] implements the core `EventStore` contract on SQLite or
//! PostgreSQL, and [`events_router`] exposes it under `/api/:chain_id/events`.

pub mod api;
pub mod storage;

pub use api::{events_router, EventsResponse, Pagination};
pub use storage::FeeStorage;
