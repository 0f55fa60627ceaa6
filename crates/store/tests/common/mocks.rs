//! Backend wrappers for exercising deadlines and lease races.

use async_trait::async_trait;
use larder_store::models::{LeaseRow, RecordMetaRow};
use larder_store::repos::{LeaseRepo, RecordRepo};
use larder_store::{StorageBackend, StoreResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Delays every call by a fixed amount before delegating.
#[allow(dead_code)]
pub struct SlowBackend {
    inner: Arc<dyn StorageBackend>,
    delay: Duration,
    pub calls: AtomicU64,
}

#[allow(dead_code)]
impl SlowBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicU64::new(0),
        }
    }

    async fn pause(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl RecordRepo for SlowBackend {
    async fn upsert_record(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.pause().await;
        self.inner.upsert_record(key, value).await
    }

    async fn get_record_value(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.pause().await;
        self.inner.get_record_value(key).await
    }

    async fn get_record_meta(&self, key: &str) -> StoreResult<Option<RecordMetaRow>> {
        self.pause().await;
        self.inner.get_record_meta(key).await
    }

    async fn record_exists(&self, key: &str) -> StoreResult<bool> {
        self.pause().await;
        self.inner.record_exists(key).await
    }

    async fn delete_record(&self, key: &str) -> StoreResult<u64> {
        self.pause().await;
        self.inner.delete_record(key).await
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.pause().await;
        self.inner.list_keys_with_prefix(prefix).await
    }
}

#[async_trait]
impl LeaseRepo for SlowBackend {
    async fn now_ms(&self) -> StoreResult<i64> {
        self.pause().await;
        self.inner.now_ms().await
    }

    async fn purge_expired_leases(&self, now_ms: i64) -> StoreResult<u64> {
        self.pause().await;
        self.inner.purge_expired_leases(now_ms).await
    }

    async fn try_insert_lease(&self, key: &str, expire_at: i64) -> StoreResult<bool> {
        self.pause().await;
        self.inner.try_insert_lease(key, expire_at).await
    }

    async fn reclaim_expired_lease(
        &self,
        key: &str,
        expire_at: i64,
        now_ms: i64,
    ) -> StoreResult<bool> {
        self.pause().await;
        self.inner
            .reclaim_expired_lease(key, expire_at, now_ms)
            .await
    }

    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRow>> {
        self.pause().await;
        self.inner.get_lease(key).await
    }

    async fn delete_lease(&self, key: &str) -> StoreResult<u64> {
        self.pause().await;
        self.inner.delete_lease(key).await
    }
}

#[async_trait]
impl StorageBackend for SlowBackend {
    async fn migrate(&self) -> StoreResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.pause().await;
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "slow"
    }
}

/// Bends the lease path of an inner backend: optionally skips expired-lease
/// housekeeping, and optionally stalls after an insert has committed.
#[allow(dead_code)]
pub struct LeaseFaultBackend {
    inner: Arc<dyn StorageBackend>,
    delay_after_insert: Option<Duration>,
    skip_purge: bool,
}

#[allow(dead_code)]
impl LeaseFaultBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            delay_after_insert: None,
            skip_purge: false,
        }
    }

    /// Sleep for `delay` once `try_insert_lease` returns.
    pub fn delay_after_insert(mut self, delay: Duration) -> Self {
        self.delay_after_insert = Some(delay);
        self
    }

    /// Leave expired leases in place so acquisition must reclaim them.
    pub fn skip_purge(mut self) -> Self {
        self.skip_purge = true;
        self
    }
}

#[async_trait]
impl RecordRepo for LeaseFaultBackend {
    async fn upsert_record(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.inner.upsert_record(key, value).await
    }

    async fn get_record_value(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get_record_value(key).await
    }

    async fn get_record_meta(&self, key: &str) -> StoreResult<Option<RecordMetaRow>> {
        self.inner.get_record_meta(key).await
    }

    async fn record_exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.record_exists(key).await
    }

    async fn delete_record(&self, key: &str) -> StoreResult<u64> {
        self.inner.delete_record(key).await
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list_keys_with_prefix(prefix).await
    }
}

#[async_trait]
impl LeaseRepo for LeaseFaultBackend {
    async fn now_ms(&self) -> StoreResult<i64> {
        self.inner.now_ms().await
    }

    async fn purge_expired_leases(&self, now_ms: i64) -> StoreResult<u64> {
        if self.skip_purge {
            return Ok(0);
        }
        self.inner.purge_expired_leases(now_ms).await
    }

    async fn try_insert_lease(&self, key: &str, expire_at: i64) -> StoreResult<bool> {
        let inserted = self.inner.try_insert_lease(key, expire_at).await?;
        if let Some(delay) = self.delay_after_insert {
            tokio::time::sleep(delay).await;
        }
        Ok(inserted)
    }

    async fn reclaim_expired_lease(
        &self,
        key: &str,
        expire_at: i64,
        now_ms: i64,
    ) -> StoreResult<bool> {
        self.inner
            .reclaim_expired_lease(key, expire_at, now_ms)
            .await
    }

    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRow>> {
        self.inner.get_lease(key).await
    }

    async fn delete_lease(&self, key: &str) -> StoreResult<u64> {
        self.inner.delete_lease(key).await
    }
}

#[async_trait]
impl StorageBackend for LeaseFaultBackend {
    async fn migrate(&self) -> StoreResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "lease-fault"
    }
}
