//! Record repository trait.

use crate::error::StoreResult;
use crate::models::RecordMetaRow;
use async_trait::async_trait;

/// Repository for byte records keyed by path.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Insert or overwrite a record. The backend stamps `modified_at` and
    /// stores `size` in the same statement.
    async fn upsert_record(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Get a record's value.
    async fn get_record_value(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Get a record's metadata without reading its value.
    async fn get_record_meta(&self, key: &str) -> StoreResult<Option<RecordMetaRow>>;

    /// Check whether a record exists.
    async fn record_exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a record. Returns the number of rows removed.
    async fn delete_record(&self, key: &str) -> StoreResult<u64>;

    /// List every key starting with `prefix`, compared exactly (no wildcards,
    /// no case folding). Order is backend scan order.
    async fn list_keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
