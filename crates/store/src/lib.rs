//! SQL-backed key storage with lease-based cross-process locks.
//!
//! This crate provides:
//! - Backends over SQLite and PostgreSQL (sqlx connection pools)
//! - Record CRUD and hierarchical prefix listing over one flat table
//! - TTL-bounded exclusive leases coordinated only through a second table
//! - The [`Storage`] interface a host integration adapts

pub mod clock;
pub mod error;
pub mod listing;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod postgres;
pub mod records;
pub mod repos;
pub mod storage;
pub mod store;

pub use clock::{BackendClock, Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use listing::PrefixIndex;
pub use lock::LeaseLock;
pub use postgres::PostgresStore;
pub use records::RecordStore;
pub use storage::{SqlStorage, Storage};
pub use store::{SqliteStore, StorageBackend};

use larder_core::config::BackendConfig;
use std::sync::Arc;

/// Create a backend from configuration.
pub async fn from_config(config: &BackendConfig) -> StoreResult<Arc<dyn StorageBackend>> {
    config.validate()?;

    match config {
        BackendConfig::Sqlite {
            path,
            busy_timeout_ms,
            max_connections,
        } => {
            let store =
                SqliteStore::new(path, Some(*busy_timeout_ms), Some(*max_connections)).await?;
            Ok(Arc::new(store) as Arc<dyn StorageBackend>)
        }
        BackendConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                // URL takes precedence over individual fields
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(StoreError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn StorageBackend>)
        }
    }
}
