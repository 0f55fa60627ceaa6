//! The storage interface hosts adapt, and its SQL implementation.

use crate::clock::{BackendClock, Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::listing::PrefixIndex;
use crate::lock::LeaseLock;
use crate::metrics;
use crate::records::RecordStore;
use crate::store::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use larder_core::{ClockSource, KeyInfo, StoreConfig};
use std::future::Future;
use std::sync::Arc;
use time::Duration;

/// Key storage with cross-process locking.
///
/// Every operation reflects the backend's committed state at call time;
/// nothing is cached.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or overwrite the value at `key`.
    async fn store(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Read the value at `key`.
    async fn load(&self, key: &str) -> StoreResult<Bytes>;

    /// Remove the record at `key`. Fails with `NotFound` if absent.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Whether a record exists at `key`.
    ///
    /// Never fails: backend errors and timeouts read as `false` and are only
    /// visible in logs and `larder_suppressed_errors_total`.
    async fn exists(&self, key: &str) -> bool;

    /// Keys starting with `prefix`; only immediate children unless `recursive`.
    /// Order is unspecified.
    async fn list(&self, prefix: &str, recursive: bool) -> StoreResult<Vec<String>>;

    /// Metadata for `key`.
    async fn stat(&self, key: &str) -> StoreResult<KeyInfo>;

    /// Take the lease on `key` for `ttl`, or the default TTL.
    ///
    /// If the call times out but the lease is acquired afterwards, that lease
    /// is released again, so a timed-out caller never leaves a lease held.
    async fn lock(&self, key: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Drop the lease on `key`.
    ///
    /// Never fails: backend errors and timeouts are only visible in logs and
    /// `larder_suppressed_errors_total`; the lease then lapses at its expiry.
    async fn unlock(&self, key: &str);
}

/// [`Storage`] over a SQL backend.
#[derive(Clone)]
pub struct SqlStorage {
    backend: Arc<dyn StorageBackend>,
    records: RecordStore,
    index: PrefixIndex,
    locks: LeaseLock,
    operation_timeout: Option<std::time::Duration>,
}

impl SqlStorage {
    /// Assemble the storage from an existing backend.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            records: RecordStore::new(backend.clone()),
            index: PrefixIndex::new(backend.clone()),
            locks: LeaseLock::new(backend.clone(), clock, default_ttl),
            backend,
            operation_timeout: None,
        }
    }

    /// Connect, migrate and assemble everything the configuration describes.
    pub async fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let backend = crate::from_config(&config.backend).await?;
        let clock: Arc<dyn Clock> = match config.lock.clock {
            ClockSource::Backend => Arc::new(BackendClock::new(backend.clone())),
            ClockSource::System => Arc::new(SystemClock),
        };
        tracing::info!(
            backend = backend.backend_name(),
            clock = ?config.lock.clock,
            lock_ttl_secs = config.lock.default_ttl().whole_seconds(),
            operation_timeout_ms = ?config.operation_timeout_ms,
            "Storage ready"
        );
        let storage = Self::new(backend, clock, config.lock.default_ttl());
        Ok(match config.operation_timeout() {
            Some(timeout) => storage.with_operation_timeout(timeout),
            None => storage,
        })
    }

    /// Bound every operation by `timeout`.
    pub fn with_operation_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn index(&self) -> &PrefixIndex {
        &self.index
    }

    pub fn locks(&self) -> &LeaseLock {
        &self.locks
    }

    /// Run `fut` under the operation deadline, if any.
    ///
    /// Dropping the backend future on expiry abandons the statement; each
    /// record statement is atomic, so nothing half-written is left behind.
    /// Locking spans several statements and goes through [`Self::bounded_lock`].
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        match self.operation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| StoreError::Timeout {
                    operation,
                    timeout_ms: millis(timeout),
                })?,
            None => fut.await,
        }
    }

    /// Like [`Self::bounded`] for operations that never fail.
    async fn bounded_infallible<T, F>(&self, operation: &'static str, fallback: T, fut: F) -> T
    where
        F: Future<Output = T> + Send,
    {
        let Some(timeout) = self.operation_timeout else {
            return fut.await;
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(value) => value,
            Err(_) => {
                metrics::SUPPRESSED_ERRORS
                    .with_label_values(&[operation])
                    .inc();
                tracing::warn!(
                    operation,
                    timeout_ms = millis(timeout),
                    "Operation timed out, result suppressed"
                );
                fallback
            }
        }
    }

    /// Acquire under the operation deadline without stranding a lease.
    ///
    /// The attempt runs in its own task. On expiry that task keeps going,
    /// and a lease it ends up holding is released, since its caller has
    /// already been told `Timeout`.
    async fn bounded_lock(&self, key: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let Some(timeout) = self.operation_timeout else {
            return self.locks.acquire(key, ttl).await;
        };

        let locks = self.locks.clone();
        let owned_key = key.to_string();
        let mut attempt = tokio::spawn(async move { locks.acquire(&owned_key, ttl).await });

        match tokio::time::timeout(timeout, &mut attempt).await {
            Ok(joined) => joined.map_err(|e| {
                StoreError::Internal(format!("lock attempt for {key} failed: {e}"))
            })?,
            Err(_) => {
                let locks = self.locks.clone();
                let owned_key = key.to_string();
                tokio::spawn(async move {
                    if let Ok(Ok(())) = attempt.await {
                        tracing::warn!(
                            key = %owned_key,
                            "Lease acquired after lock deadline, releasing"
                        );
                        locks.release(&owned_key).await;
                    }
                });
                Err(StoreError::Timeout {
                    operation: "lock",
                    timeout_ms: millis(timeout),
                })
            }
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Storage for SqlStorage {
    async fn store(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.bounded("store", self.records.store(key, &value)).await
    }

    async fn load(&self, key: &str) -> StoreResult<Bytes> {
        self.bounded("load", self.records.load(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.bounded("delete", self.records.delete(key)).await
    }

    async fn exists(&self, key: &str) -> bool {
        self.bounded_infallible("exists", false, self.records.exists(key))
            .await
    }

    async fn list(&self, prefix: &str, recursive: bool) -> StoreResult<Vec<String>> {
        self.bounded("list", self.index.list(prefix, recursive))
            .await
    }

    async fn stat(&self, key: &str) -> StoreResult<KeyInfo> {
        self.bounded("stat", self.records.stat(key)).await
    }

    async fn lock(&self, key: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.bounded_lock(key, ttl).await
    }

    async fn unlock(&self, key: &str) {
        self.bounded_infallible("release", (), self.locks.release(key))
            .await
    }
}
