//! Backend trait and the SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::repos::{LeaseRepo, RecordRepo};
use async_trait::async_trait;
use larder_core::config::DEFAULT_SQLITE_MAX_CONNECTIONS;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined backend trait: everything the record store, prefix index and
/// lease lock need from a database.
#[async_trait]
pub trait StorageBackend: RecordRepo + LeaseRepo + Send + Sync {
    /// Create tables and indexes, and upgrade older layouts in place.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;

    /// Static backend identifier for logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Current time in epoch milliseconds, computed by SQLite.
///
/// `julianday` keeps millisecond resolution where `strftime('%s')` would not.
const SQLITE_NOW_MS: &str =
    "CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER)";

/// SQLite-based backend.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite database and migrate it.
    ///
    /// `max_connections` defaults to [`DEFAULT_SQLITE_MAX_CONNECTIONS`]; an
    /// in-memory database is pinned to a single connection.
    pub async fn new(
        path: impl AsRef<Path>,
        busy_timeout_ms: Option<u64>,
        max_connections: Option<u32>,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        let in_memory = path == Path::new(":memory:");

        if !in_memory {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Other processes sharing the file hold the write lock briefly; wait instead of failing.
            .busy_timeout(Duration::from_millis(busy_timeout_ms.unwrap_or(5_000)));

        let max_connections = if in_memory {
            1
        } else {
            max_connections.unwrap_or(DEFAULT_SQLITE_MAX_CONNECTIONS).max(1)
        };
        let mut pool_opts = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            // Each connection would open its own database; keep the one alive.
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(path = %path.display(), max_connections, "Opened SQLite backend");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Column names of a table, empty if the table does not exist.
    async fn table_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
            sqlx::query_as(&format!("PRAGMA table_info({table})"))
                .fetch_all(&self.pool)
                .await?;
        Ok(columns.into_iter().map(|(_, name, ..)| name).collect())
    }

    /// Refuse to run against a same-named table with an unrelated layout.
    async fn check_existing_layout(&self, table: &str, required: &[&str]) -> StoreResult<()> {
        let columns = self.table_columns(table).await?;
        if columns.is_empty() {
            return Ok(());
        }
        let missing: Vec<&str> = required
            .iter()
            .filter(|col| !columns.iter().any(|c| c == *col))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Internal(format!(
                "Incompatible database schema detected: {table} table is missing columns: {}. \
                 Rename or drop the table so it can be recreated.",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Rewrite text timestamps left by older writers as epoch milliseconds.
    ///
    /// Both `YYYY-MM-DD HH:MM:SS` and RFC 3339 parse through `julianday` and are
    /// read as UTC. An unparseable lease expiry cannot be honoured, so the lease
    /// is dropped; an unparseable record time becomes the epoch.
    async fn migrate_text_timestamps(&self) -> StoreResult<()> {
        let leases_converted = sqlx::query(
            "UPDATE leases \
             SET expire_at = CAST(ROUND((julianday(expire_at) - 2440587.5) * 86400000.0) AS INTEGER) \
             WHERE typeof(expire_at) = 'text' AND julianday(expire_at) IS NOT NULL",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        let leases_dropped = sqlx::query("DELETE FROM leases WHERE typeof(expire_at) <> 'integer'")
            .execute(&self.pool)
            .await?
            .rows_affected();

        let records_converted = sqlx::query(
            "UPDATE records \
             SET modified_at = COALESCE( \
                 CAST(ROUND((julianday(modified_at) - 2440587.5) * 86400000.0) AS INTEGER), 0) \
             WHERE typeof(modified_at) <> 'integer'",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if leases_converted + leases_dropped + records_converted > 0 {
            tracing::info!(
                leases_converted,
                leases_dropped,
                records_converted,
                "Migrated text timestamps to epoch milliseconds"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        self.check_existing_layout("records", &["key", "value", "modified_at", "size"])
            .await?;
        self.check_existing_layout("leases", &["key", "expire_at"])
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        self.migrate_text_timestamps().await
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{LeaseRow, RecordMetaRow};

    #[async_trait]
    impl RecordRepo for SqliteStore {
        async fn upsert_record(&self, key: &str, value: &[u8]) -> StoreResult<()> {
            let size = i64::try_from(value.len())
                .map_err(|_| StoreError::Internal(format!("value for {key} is too large")))?;
            sqlx::query(&format!(
                r#"
                INSERT INTO records (key, value, modified_at, size)
                VALUES (?, ?, {SQLITE_NOW_MS}, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    modified_at = excluded.modified_at,
                    size = excluded.size
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
            let value: Option<Vec<u8>> =
                sqlx::query_scalar("SELECT value FROM records WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(value)
        }

        async fn get_record_meta(&self, key: &str) -> StoreResult<Option<RecordMetaRow>> {
            let row = sqlx::query_as::<_, RecordMetaRow>(
                "SELECT key, size, modified_at FROM records WHERE key = ?",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn record_exists(&self, key: &str) -> StoreResult<bool> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM records WHERE key = ?)")
                    .bind(key)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        }

        async fn delete_record(&self, key: &str) -> StoreResult<u64> {
            let result = sqlx::query("DELETE FROM records WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
            // LIKE folds ASCII case and treats % and _ as wildcards; compare the
            // leading substring instead.
            let keys: Vec<String> =
                sqlx::query_scalar("SELECT key FROM records WHERE substr(key, 1, length(?)) = ?")
                    .bind(prefix)
                    .bind(prefix)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(keys)
        }
    }

    #[async_trait]
    impl LeaseRepo for SqliteStore {
        async fn now_ms(&self) -> StoreResult<i64> {
            let now: i64 = sqlx::query_scalar(&format!("SELECT {SQLITE_NOW_MS}"))
                .fetch_one(&self.pool)
                .await?;
            Ok(now)
        }

        async fn purge_expired_leases(&self, now_ms: i64) -> StoreResult<u64> {
            let result = sqlx::query("DELETE FROM leases WHERE expire_at <= ?")
                .bind(now_ms)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn try_insert_lease(&self, key: &str, expire_at: i64) -> StoreResult<bool> {
            let result = sqlx::query(
                "INSERT INTO leases (key, expire_at) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
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
            let result =
                sqlx::query("UPDATE leases SET expire_at = ? WHERE key = ? AND expire_at <= ?")
                    .bind(expire_at)
                    .bind(key)
                    .bind(now_ms)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRow>> {
            let row =
                sqlx::query_as::<_, LeaseRow>("SELECT key, expire_at FROM leases WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn delete_lease(&self, key: &str) -> StoreResult<u64> {
            let result = sqlx::query("DELETE FROM leases WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Byte records keyed by slash-delimited path. size mirrors length(value).
CREATE TABLE IF NOT EXISTS records (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    modified_at INTEGER NOT NULL,
    size INTEGER NOT NULL
);

-- One row per held lease. The primary key is the mutual exclusion.
CREATE TABLE IF NOT EXISTS leases (
    key TEXT PRIMARY KEY NOT NULL,
    expire_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leases_expire_at ON leases(expire_at);
"#;
