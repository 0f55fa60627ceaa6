//! Time sources for lease stamping and comparison.
//!
//! A lease lock reads one clock for both the expiry it writes and the "now"
//! it compares against, so a single source is authoritative end to end.

use crate::error::StoreResult;
use crate::store::StorageBackend;
use async_trait::async_trait;
use larder_core::key_info::datetime_to_millis;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::{Duration, OffsetDateTime};

/// A source of epoch-millisecond timestamps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    async fn now_ms(&self) -> StoreResult<i64>;
}

/// Reads time from the database, shared by every process using it.
pub struct BackendClock {
    backend: Arc<dyn StorageBackend>,
}

impl BackendClock {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Clock for BackendClock {
    async fn now_ms(&self) -> StoreResult<i64> {
        self.backend.now_ms().await
    }
}

/// Local UTC wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn now_ms(&self) -> StoreResult<i64> {
        Ok(datetime_to_millis(OffsetDateTime::now_utc()))
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Start at the given epoch milliseconds.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Move the clock forward (or backward, for a negative duration).
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.whole_milliseconds()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn now_ms(&self) -> StoreResult<i64> {
        Ok(self.now_ms.load(Ordering::SeqCst))
    }
}
