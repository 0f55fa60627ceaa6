//! Record CRUD over the `records` table.

use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::store::StorageBackend;
use bytes::Bytes;
use larder_core::{KeyInfo, validate_key};
use std::sync::Arc;

/// Byte records keyed by path, with last-writer-wins semantics.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Insert or overwrite the value at `key`.
    pub async fn store(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        self.backend.upsert_record(key, value).await?;
        tracing::debug!(key = %key, size = value.len(), "Stored record");
        Ok(())
    }

    /// Read the value at `key`. An empty value is a present record.
    pub async fn load(&self, key: &str) -> StoreResult<Bytes> {
        validate_key(key)?;
        self.backend
            .get_record_value(key)
            .await?
            .map(Bytes::from)
            .ok_or_else(|| StoreError::NotFound(format!("key {key}")))
    }

    /// Remove the record at `key`; absent keys are an error, not a no-op.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        if self.backend.delete_record(key).await? == 0 {
            return Err(StoreError::NotFound(format!("key {key}")));
        }
        tracing::debug!(key = %key, "Deleted record");
        Ok(())
    }

    /// Whether a record exists at `key`.
    ///
    /// Never fails: a backend error reads as `false`. The error is logged and
    /// counted under `larder_suppressed_errors_total{operation="exists"}`, so
    /// an outage shows up there rather than to the caller.
    pub async fn exists(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        match self.backend.record_exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                metrics::SUPPRESSED_ERRORS
                    .with_label_values(&["exists"])
                    .inc();
                tracing::warn!(key = %key, error = %e, "Exists check failed, reporting absent");
                false
            }
        }
    }

    /// Metadata for `key` without reading its value.
    pub async fn stat(&self, key: &str) -> StoreResult<KeyInfo> {
        validate_key(key)?;
        self.backend
            .get_record_meta(key)
            .await?
            .map(|row| row.into_key_info())
            .ok_or_else(|| StoreError::NotFound(format!("key {key}")))
    }
}
