//! Backend test utilities.

use larder_store::{
    BackendClock, Clock, ManualClock, PostgresStore, SqlStorage, SqliteStore, StorageBackend,
    StoreResult,
};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use time::Duration;

/// A SQLite backend in a temporary directory, removed on drop.
#[allow(dead_code)]
pub struct TestBackend {
    pub backend: Arc<dyn StorageBackend>,
    pub(crate) sqlite_store: Arc<SqliteStore>,
    temp_dir: TempDir,
}

impl TestBackend {
    /// Create a new file-backed SQLite backend.
    pub async fn new() -> StoreResult<Self> {
        super::init_test_tracing();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("test.db"), None, None).await?;
        let arc_store = Arc::new(store);

        Ok(Self {
            backend: arc_store.clone(),
            sqlite_store: arc_store,
            temp_dir,
        })
    }

    /// Get a reference to the backend.
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    /// Path of the database file, for opening further independent pools.
    #[allow(dead_code)]
    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("test.db")
    }

    /// Get a reference to the SQLite connection pool for raw queries.
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }

    /// Storage reading time from the database.
    #[allow(dead_code)]
    pub fn storage(&self) -> SqlStorage {
        storage_with_backend_clock(self.backend())
    }

    /// Storage reading time from a manual clock.
    #[allow(dead_code)]
    pub fn storage_with_clock(&self, clock: Arc<ManualClock>) -> SqlStorage {
        SqlStorage::new(self.backend(), clock, Duration::seconds(60))
    }
}

/// Storage over `backend` with the database as its clock.
#[allow(dead_code)]
pub fn storage_with_backend_clock(backend: Arc<dyn StorageBackend>) -> SqlStorage {
    let clock: Arc<dyn Clock> = Arc::new(BackendClock::new(backend.clone()));
    SqlStorage::new(backend, clock, Duration::seconds(60))
}

/// PostgreSQL backend that manages a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestBackend {
    pub backend: Arc<dyn StorageBackend>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestBackend {
    /// Start a PostgreSQL container and connect to it.
    pub async fn new() -> StoreResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                larder_store::StoreError::Internal(format!(
                    "Failed to start PostgreSQL container: {e}"
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = PostgresStore::from_url(&url, 8, None).await?;

        Ok(Self {
            backend: Arc::new(store),
            _container: container,
        })
    }

    /// Get a reference to the backend.
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
///
/// PostgreSQL is skipped when SKIP_POSTGRES_TESTS is set or Docker is unavailable.
#[allow(dead_code)]
pub async fn run_backend_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn StorageBackend>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestBackend::new()
        .await
        .expect("Failed to create SQLite test backend");
    test_fn.clone()(sqlite.backend()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestBackend::new().await {
            Ok(postgres) => {
                test_fn(postgres.backend()).await;
            }
            Err(err) => {
                eprintln!("Skipping PostgreSQL backend tests: {err}");
            }
        }
    }
}
