//! Database models mapping to the store schema.
//!
//! Timestamps are epoch milliseconds in every column. One integer
//! representation keeps lease comparisons exact across backends.

use larder_core::KeyInfo;
use sqlx::FromRow;

/// Record metadata, read without touching the value column.
#[derive(Debug, Clone, FromRow)]
pub struct RecordMetaRow {
    pub key: String,
    pub size: i64,
    pub modified_at: i64,
}

impl RecordMetaRow {
    /// Project the row into public key metadata.
    pub fn into_key_info(self) -> KeyInfo {
        KeyInfo::project(self.key, self.size, self.modified_at)
    }
}

/// Lease record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LeaseRow {
    pub key: String,
    pub expire_at: i64,
}

impl LeaseRow {
    /// Whether the lease is still held at `now_ms`.
    ///
    /// A lease whose expiry equals `now_ms` is already abandoned, matching the
    /// `expire_at <= now` reclamation predicate.
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expire_at > now_ms
    }

    /// Milliseconds until the lease expires, zero once abandoned.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.expire_at.saturating_sub(now_ms).max(0)
    }
}
