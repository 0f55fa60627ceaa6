//! PostgreSQL-based backend implementation.

use crate::error::{StoreError, StoreResult};
use crate::models::{LeaseRow, RecordMetaRow};
use crate::repos::{LeaseRepo, RecordRepo};
use crate::store::StorageBackend;
use async_trait::async_trait;
use larder_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Current time in epoch milliseconds, computed by PostgreSQL.
///
/// `clock_timestamp()` rather than `now()`: the latter is frozen for the
/// whole transaction.
const POSTGRES_NOW_MS: &str = "FLOOR(EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT";

/// Executable statements of a schema script.
///
/// Prepared statements hold one command each, so the script is run piecewise.
fn schema_statements(script: &str) -> Vec<String> {
    let uncommented: Vec<&str> = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect();
    uncommented
        .join("\n")
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

fn sqlx_ssl_mode(mode: PgSslMode) -> SqlxPgSslMode {
    match mode {
        PgSslMode::Disable => SqlxPgSslMode::Disable,
        PgSslMode::Prefer => SqlxPgSslMode::Prefer,
        PgSslMode::Require => SqlxPgSslMode::Require,
    }
}

/// PostgreSQL-based backend.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect with a `postgres://` URL and migrate.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        tracing::info!(
            host = opts.get_host(),
            database = opts.get_database().unwrap_or("<default>"),
            "Connecting to PostgreSQL"
        );
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect with discrete parameters and migrate.
    ///
    /// Lets the password arrive separately from the rest, e.g. through
    /// `LARDER_BACKEND__PASSWORD`.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);
        if let Some(username) = username {
            opts = opts.username(username);
        }
        if let Some(password) = password {
            opts = opts.password(password);
        }
        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(sqlx_ssl_mode(mode));
        }

        tracing::info!(
            host,
            port,
            database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL"
        );
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        let opts = match statement_timeout_ms {
            Some(ms) => opts.options([("statement_timeout", format!("{ms}ms"))]),
            None => opts,
        };
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(
            max_connections,
            statement_timeout_ms = ?statement_timeout_ms,
            "Opened PostgreSQL backend"
        );
        Ok(store)
    }
}

#[async_trait]
impl StorageBackend for PostgresStore {
    async fn migrate(&self) -> StoreResult<()> {
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl RecordRepo for PostgresStore {
    async fn upsert_record(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let size = i64::try_from(value.len())
            .map_err(|_| StoreError::Internal(format!("value for {key} is too large")))?;
        sqlx::query(&format!(
            r#"
            INSERT INTO records (key, value, modified_at, size)
            VALUES ($1, $2, {POSTGRES_NOW_MS}, $3)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                modified_at = EXCLUDED.modified_at,
                size = EXCLUDED.size
            "#
        ))
        .bind(key)
        .bind(value)
        .bind(size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_record_value(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM records WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn get_record_meta(&self, key: &str) -> StoreResult<Option<RecordMetaRow>> {
        let row = sqlx::query_as::<_, RecordMetaRow>(
            "SELECT key, size, modified_at FROM records WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_exists(&self, key: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM records WHERE key = $1)")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn delete_record(&self, key: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM records WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM records WHERE starts_with(key, $1)")
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }
}

#[async_trait]
impl LeaseRepo for PostgresStore {
    async fn now_ms(&self) -> StoreResult<i64> {
        let now: i64 = sqlx::query_scalar(&format!("SELECT {POSTGRES_NOW_MS}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(now)
    }

    async fn purge_expired_leases(&self, now_ms: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM leases WHERE expire_at <= $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn try_insert_lease(&self, key: &str, expire_at: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO leases (key, expire_at) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(expire_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_expired_lease(
        &self,
        key: &str,
        expire_at: i64,
        now_ms: i64,
    ) -> StoreResult<bool> {
        // Under READ COMMITTED a competing UPDATE re-evaluates the WHERE clause
        // against the winner's row, so only one caller sees an affected row.
        let result =
            sqlx::query("UPDATE leases SET expire_at = $1 WHERE key = $2 AND expire_at <= $3")
                .bind(expire_at)
                .bind(key)
                .bind(now_ms)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRow>> {
        let row = sqlx::query_as::<_, LeaseRow>("SELECT key, expire_at FROM leases WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete_lease(&self, key: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM leases WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
