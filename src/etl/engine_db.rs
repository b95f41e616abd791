//! Engine database.
//!
//! Holds the per-chain cursors of the scanners. Backed by SQLite by default or
//! PostgreSQL when given a `postgres://` URL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, Any, Pool, Row};
use std::path::Path;

use super::store::CheckpointStore;

/// Embedded SQL schemas
const SQLITE_SCHEMA_SQL: &str = include_str!("../../sql/engine_schema.sql");
const POSTGRES_SCHEMA_SQL: &str = include_str!("../../sql/engine_schema_postgres.sql");

/// Engine database configuration
#[derive(Debug, Clone)]
pub struct EngineDbConfig {
    pub path: String,
}

/// SQL dialect behind an `Any` pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbBackend {
    Sqlite,
    Postgres,
}

impl DbBackend {
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("postgres://") || path.starts_with("postgresql://") {
            Self::Postgres
        } else {
            Self::Sqlite
        }
    }
}

fn is_memory(path: &str) -> bool {
    path == ":memory:" || path == "sqlite::memory:"
}

/// Opens an `Any` pool for a file path, `sqlite:` URL, `:memory:` or PostgreSQL URL.
///
/// Parent directories of SQLite files are created. In-memory databases get a
/// single connection so every query sees the same database.
pub async fn connect_pool(path: &str) -> Result<(Pool<Any>, DbBackend)> {
    sqlx::any::install_default_drivers();

    let backend = DbBackend::from_path(path);

    if backend == DbBackend::Sqlite && !is_memory(path) && !path.starts_with("sqlite:") {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }
    }

    let database_url = match backend {
        DbBackend::Postgres => path.to_string(),
        DbBackend::Sqlite => {
            if is_memory(path) {
                "sqlite::memory:".to_string()
            } else if path.starts_with("sqlite:") {
                path.to_string()
            } else {
                format!("sqlite://{path}?mode=rwc")
            }
        }
    };

    tracing::debug!(
        target: "feescan::etl::engine_db",
        "Connecting to database: {}",
        database_url
    );

    let options = if is_memory(path) {
        // The database lives as long as its only connection
        AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        AnyPoolOptions::new().max_connections(5)
    };
    let pool = options
        .connect(&database_url)
        .await
        .context(format!("Failed to connect to database: {database_url}"))?;

    Ok((pool, backend))
}

/// Applies SQLite PRAGMAs for write-heavy indexing.
pub async fn apply_sqlite_pragmas(pool: &Pool<Any>) -> Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout=5000").execute(pool).await?;
    Ok(())
}

/// Executes a `;` separated schema script, skipping `--` comment lines.
pub async fn execute_schema(pool: &Pool<Any>, schema_sql: &str) -> Result<()> {
    for statement in schema_sql.split(';') {
        // Remove comment lines
        let sql_lines: Vec<&str> = statement
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with("--")
            })
            .collect();

        if sql_lines.is_empty() {
            continue;
        }

        let clean_sql = sql_lines.join("\n");

        sqlx::query(&clean_sql)
            .execute(pool)
            .await
            .context(format!(
                "Failed to execute SQL: {}",
                clean_sql.lines().next().unwrap_or("")
            ))?;
    }

    Ok(())
}

/// Engine database for tracking scanner progress
pub struct EngineDb {
    pool: Pool<Any>,
    backend: DbBackend,
}

impl EngineDb {
    /// Create a new engine database
    pub async fn new(config: EngineDbConfig) -> Result<Self> {
        let (pool, backend) = connect_pool(&config.path)
            .await
            .context("Failed to connect to engine database")?;

        let db = Self { pool, backend };
        db.init_schema().await?;

        Ok(db)
    }

    fn table(&self) -> &'static str {
        match self.backend {
            DbBackend::Sqlite => "chain_cursor",
            DbBackend::Postgres => "engine.chain_cursor",
        }
    }

    /// Initialize database with backend tuning and schema
    async fn init_schema(&self) -> Result<()> {
        if self.backend == DbBackend::Sqlite {
            apply_sqlite_pragmas(&self.pool).await?;
            tracing::debug!(target: "feescan::etl::engine_db", "Applied SQLite PRAGMAs");
        }

        self.load_schema_from_sql().await?;

        tracing::info!(target: "feescan::etl::engine_db", "Engine database schema initialized");

        Ok(())
    }

    /// Load schema from SQL file
    async fn load_schema_from_sql(&self) -> Result<()> {
        let schema_sql = match self.backend {
            DbBackend::Sqlite => SQLITE_SCHEMA_SQL,
            DbBackend::Postgres => POSTGRES_SCHEMA_SQL,
        };

        execute_schema(&self.pool, schema_sql).await
    }

    /// All stored cursors, ordered by chain id.
    pub async fn get_cursors(&self) -> Result<Vec<(u64, u64)>> {
        let table = self.table();
        let rows = sqlx::query(&format!(
            "SELECT chain_id, block_number FROM {table} ORDER BY chain_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let chain_id: i64 = row.get(0);
                let block_number: i64 = row.get(1);
                (chain_id as u64, block_number as u64)
            })
            .collect())
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CheckpointStore for EngineDb {
    async fn get_cursor(&self, chain_id: u64) -> Result<Option<u64>> {
        let table = self.table();
        let sql = match self.backend {
            DbBackend::Sqlite => format!("SELECT block_number FROM {table} WHERE chain_id = ?"),
            DbBackend::Postgres => {
                format!("SELECT block_number FROM {table} WHERE chain_id = $1")
            }
        };

        let block_number: Option<i64> = sqlx::query_scalar(&sql)
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read chain cursor")?;

        Ok(block_number.map(|block| block as u64))
    }

    async fn set_cursor(&self, chain_id: u64, block_number: u64) -> Result<()> {
        let sql = match self.backend {
            DbBackend::Sqlite => "INSERT INTO chain_cursor (chain_id, block_number, updated_at) \
                 VALUES (?, ?, strftime('%s', 'now')) \
                 ON CONFLICT(chain_id) \
                 DO UPDATE SET block_number = excluded.block_number, updated_at = excluded.updated_at \
                 WHERE excluded.block_number >= chain_cursor.block_number",
            DbBackend::Postgres => "INSERT INTO engine.chain_cursor AS c (chain_id, block_number, updated_at) \
                 VALUES ($1, $2, EXTRACT(EPOCH FROM NOW())::BIGINT) \
                 ON CONFLICT(chain_id) \
                 DO UPDATE SET block_number = EXCLUDED.block_number, updated_at = EXCLUDED.updated_at \
                 WHERE EXCLUDED.block_number >= c.block_number",
        };

        sqlx::query(sql)
            .bind(chain_id as i64)
            .bind(block_number as i64)
            .execute(&self.pool)
            .await
            .context("Failed to commit chain cursor")?;

        tracing::debug!(
            target: "feescan::etl::engine_db",
            chain_id,
            block_number,
            "Committed cursor"
        );

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
