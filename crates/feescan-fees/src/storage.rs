//! SQL storage for FeesCollected events
//!
//! SQLite by default, PostgreSQL when opened with a `postgres://` URL. Rows are
//! keyed by `(chain_id, block_number, transaction_hash)`; inserts never
//! overwrite an existing row. Timestamps are stored as unix seconds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use feescan::etl::engine_db::{apply_sqlite_pragmas, connect_pool, execute_schema, DbBackend};
use feescan::etl::store::{EventStore, FeeEvent, FeeEventQuery};
use sqlx::{any::AnyRow, Any, Pool, Row};

const SQLITE_SCHEMA_SQL: &str = include_str!("../sql/fees_schema.sql");
const POSTGRES_SCHEMA_SQL: &str = include_str!("../sql/fees_schema_postgres.sql");

const COLUMNS: &str = "chain_id, block_number, transaction_hash, token, integrator, \
                       integrator_fee, lifi_fee, timestamp";

/// Storage for fee events
pub struct FeeStorage {
    pool: Pool<Any>,
    backend: DbBackend,
}

impl FeeStorage {
    /// Create or open the database
    pub async fn new(db_path: &str) -> Result<Self> {
        let (pool, backend) = connect_pool(db_path)
            .await
            .context("Failed to connect to fees database")?;

        let schema = match backend {
            DbBackend::Sqlite => {
                apply_sqlite_pragmas(&pool).await?;
                SQLITE_SCHEMA_SQL
            }
            DbBackend::Postgres => POSTGRES_SCHEMA_SQL,
        };
        execute_schema(&pool, schema).await?;

        tracing::info!(
            target: "feescan_fees::storage",
            backend = ?backend,
            "Fees database schema initialized"
        );

        Ok(Self { pool, backend })
    }

    fn table(&self) -> &'static str {
        match self.backend {
            DbBackend::Sqlite => "fee_events",
            DbBackend::Postgres => "fees.fee_events",
        }
    }

    /// Bind placeholder number `n` (1-based) of the backend.
    fn placeholder(&self, n: usize) -> String {
        match self.backend {
            DbBackend::Sqlite => "?".to_string(),
            DbBackend::Postgres => format!("${n}"),
        }
    }

    /// `WHERE` clause of a query, using placeholders 1 and 2.
    fn filter_clause(&self, query: &FeeEventQuery) -> String {
        let mut clause = format!("WHERE chain_id = {}", self.placeholder(1));
        if query.integrator.is_some() {
            clause.push_str(&format!(" AND integrator = {}", self.placeholder(2)));
        }
        clause
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_event(row: &AnyRow) -> Result<FeeEvent> {
    let chain_id: i64 = row.try_get("chain_id")?;
    let block_number: i64 = row.try_get("block_number")?;
    let timestamp: i64 = row.try_get("timestamp")?;

    Ok(FeeEvent {
        chain_id: chain_id as u64,
        block_number: block_number as u64,
        transaction_hash: row.try_get("transaction_hash")?,
        token: row.try_get("token")?,
        integrator: row.try_get("integrator")?,
        integrator_fee: row.try_get("integrator_fee")?,
        lifi_fee: row.try_get("lifi_fee")?,
        timestamp: DateTime::from_timestamp(timestamp, 0)
            .with_context(|| format!("Invalid stored timestamp {timestamp}"))?,
    })
}

#[async_trait]
impl EventStore for FeeStorage {
    async fn insert_if_absent(&self, events: &[FeeEvent]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<String> = (1..=8).map(|n| self.placeholder(n)).collect();
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ({}) \
             ON CONFLICT (chain_id, block_number, transaction_hash) DO NOTHING",
            self.table(),
            placeholders.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for event in events {
            let result = sqlx::query(&sql)
                .bind(event.chain_id as i64)
                .bind(event.block_number as i64)
                .bind(event.transaction_hash.as_str())
                .bind(event.token.as_str())
                .bind(event.integrator.as_str())
                .bind(event.integrator_fee.as_str())
                .bind(event.lifi_fee.as_str())
                .bind(event.timestamp.timestamp())
                .execute(&mut *tx)
                .await
                .context("Failed to insert fee event")?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        tracing::debug!(
            target: "feescan_fees::storage",
            received = events.len(),
            inserted,
            "Stored fee events"
        );

        Ok(inserted)
    }

    async fn count_matching(&self, query: &FeeEventQuery) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} {}",
            self.table(),
            self.filter_clause(query)
        );

        let mut statement = sqlx::query_scalar::<_, i64>(&sql).bind(query.chain_id as i64);
        if let Some(integrator) = &query.integrator {
            statement = statement.bind(integrator.as_str());
        }

        let count = statement.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn find_matching(
        &self,
        query: &FeeEventQuery,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<FeeEvent>> {
        let order = if query.newest_first { "DESC" } else { "ASC" };
        let next = if query.integrator.is_some() { 3 } else { 2 };
        let sql = format!(
            "SELECT {COLUMNS} FROM {} {} \
             ORDER BY timestamp {order}, block_number {order}, transaction_hash {order} \
             LIMIT {} OFFSET {}",
            self.table(),
            self.filter_clause(query),
            self.placeholder(next),
            self.placeholder(next + 1)
        );

        let mut statement = sqlx::query(&sql).bind(query.chain_id as i64);
        if let Some(integrator) = &query.integrator {
            statement = statement.bind(integrator.as_str());
        }

        // Offsets past i64::MAX would wrap negative
        let rows = statement
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(skip).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_event).collect()
    }
}
