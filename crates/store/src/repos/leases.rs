//! Lease repository trait.
//!
//! Every method is a single statement. Exclusion comes from the primary key
//! on `leases.key` and from affected-row counts, never from reads.

use crate::error::StoreResult;
use crate::models::LeaseRow;
use async_trait::async_trait;

/// Repository for TTL-bounded lease rows.
#[async_trait]
pub trait LeaseRepo: Send + Sync {
    /// Current time according to the database, in epoch milliseconds.
    async fn now_ms(&self) -> StoreResult<i64>;

    /// Delete every lease with `expire_at <= now_ms`. Returns rows removed.
    async fn purge_expired_leases(&self, now_ms: i64) -> StoreResult<u64>;

    /// Insert a lease unless one exists for `key`.
    /// Returns true if this call created the row.
    async fn try_insert_lease(&self, key: &str, expire_at: i64) -> StoreResult<bool>;

    /// Take over an abandoned lease: move `expire_at` forward only if the
    /// current row expired at or before `now_ms`.
    /// Returns true if this call reclaimed the row.
    async fn reclaim_expired_lease(
        &self,
        key: &str,
        expire_at: i64,
        now_ms: i64,
    ) -> StoreResult<bool>;

    /// Get the lease row for a key.
    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRow>>;

    /// Delete the lease row for a key. Returns rows removed.
    async fn delete_lease(&self, key: &str) -> StoreResult<u64>;
}
