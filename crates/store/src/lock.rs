//! Lease-based cross-process locks over the `leases` table.
//!
//! Exclusion rests on two single-statement guarantees of the backend:
//! an insert that conflicts on the primary key affects no rows, and a
//! conditional update affects a row for at most one concurrent caller.
//!
//! `acquire` runs:
//! 1. purge every expired lease (advisory, failures ignored);
//! 2. insert `(key, now + ttl)`, done if a row was inserted;
//! 3. otherwise reclaim the row if it expired at or before `now`, done if a
//!    row was updated;
//! 4. otherwise the lease is live (`Locked`), or it was released in between,
//!    in which case the insert is retried exactly once.

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::models::LeaseRow;
use crate::store::StorageBackend;
use larder_core::config::DEFAULT_LOCK_TTL_SECS;
use larder_core::validate_key;
use std::sync::Arc;
use time::Duration;

/// Per-key, TTL-bounded exclusive leases.
#[derive(Clone)]
pub struct LeaseLock {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl LeaseLock {
    /// Create a lock over `backend`, reading time from `clock`.
    ///
    /// A non-positive `default_ttl` falls back to 60 seconds.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> Self {
        let default_ttl = if default_ttl.is_positive() {
            default_ttl
        } else {
            Duration::seconds(DEFAULT_LOCK_TTL_SECS)
        };
        Self {
            backend,
            clock,
            default_ttl,
        }
    }

    /// TTL used when the caller passes none.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(ttl) if ttl.is_positive() => ttl,
            _ => self.default_ttl,
        }
    }

    /// Take the lease on `key` for `ttl` (default TTL when `None` or non-positive).
    ///
    /// Returns [`StoreError::Locked`] while another holder's lease is live.
    /// Acquiring does not block or wait for the holder.
    pub async fn acquire(&self, key: &str, ttl: Option<Duration>) -> StoreResult<()> {
        validate_key(key)?;
        let ttl = self.effective_ttl(ttl);
        let ttl_ms = i64::try_from(ttl.whole_milliseconds()).unwrap_or(i64::MAX);

        let now = self.clock.now_ms().await?;
        self.purge_expired(now).await;

        let expire_at = now.saturating_add(ttl_ms);

        if self.backend.try_insert_lease(key, expire_at).await? {
            self.acquired(key, "inserted", ttl_ms);
            return Ok(());
        }

        if self
            .backend
            .reclaim_expired_lease(key, expire_at, now)
            .await?
        {
            self.acquired(key, "reclaimed", ttl_ms);
            return Ok(());
        }

        match self.backend.get_lease(key).await? {
            Some(lease) => Err(self.contended(key, Some(lease), now)),
            None => {
                // Released between our insert and our read; one more try.
                if self.backend.try_insert_lease(key, expire_at).await? {
                    self.acquired(key, "inserted", ttl_ms);
                    return Ok(());
                }
                let lease = self.backend.get_lease(key).await?;
                Err(self.contended(key, lease, now))
            }
        }
    }

    /// Drop the lease on `key`, whether or not it is held or still live.
    ///
    /// Never fails, so cleanup paths are never blocked on lock state. A
    /// backend error is logged and counted under
    /// `larder_suppressed_errors_total{operation="release"}`; the lease then
    /// lapses on its own once its TTL passes.
    pub async fn release(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        match self.backend.delete_lease(key).await {
            Ok(0) => tracing::debug!(key = %key, "Release found no lease"),
            Ok(_) => tracing::debug!(key = %key, "Released lease"),
            Err(e) => {
                metrics::SUPPRESSED_ERRORS
                    .with_label_values(&["release"])
                    .inc();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Lease release failed, lease will lapse at expiry"
                );
            }
        }
    }

    /// Housekeeping: expired rows would be reclaimed anyway, this only keeps
    /// the table small.
    async fn purge_expired(&self, now: i64) {
        match self.backend.purge_expired_leases(now).await {
            Ok(0) => {}
            Ok(purged) => {
                metrics::LEASES_PURGED.inc_by(purged);
                tracing::debug!(purged, "Purged expired leases");
            }
            Err(e) => tracing::debug!(error = %e, "Expired lease purge failed, continuing"),
        }
    }

    fn acquired(&self, key: &str, outcome: &'static str, ttl_ms: i64) {
        metrics::LOCKS_ACQUIRED.with_label_values(&[outcome]).inc();
        tracing::debug!(key = %key, outcome, ttl_ms, "Acquired lease");
    }

    fn contended(&self, key: &str, lease: Option<LeaseRow>, now: i64) -> StoreError {
        metrics::LOCKS_CONTENDED.inc();
        let remaining_ms = match lease {
            Some(lease) if lease.is_live(now) => lease.remaining_ms(now),
            // Gone, or stamped by a clock running behind ours.
            _ => 0,
        };
        tracing::debug!(key = %key, remaining_ms, "Lease held elsewhere");
        StoreError::Locked {
            key: key.to_string(),
            remaining_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::SqliteStore;

    async fn lock_with_clock(
        default_ttl: Duration,
    ) -> (LeaseLock, Arc<ManualClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteStore::new(dir.path().join("locks.db"), None, None)
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let lock = LeaseLock::new(Arc::new(backend), clock.clone(), default_ttl);
        (lock, clock, dir)
    }

    #[tokio::test]
    async fn test_non_positive_default_ttl_falls_back_to_sixty_seconds() {
        let (lock, _clock, _dir) = lock_with_clock(Duration::ZERO).await;
        assert_eq!(lock.default_ttl(), Duration::seconds(60));
        assert_eq!(lock.effective_ttl(None), Duration::seconds(60));
        assert_eq!(lock.effective_ttl(Some(Duration::seconds(-1))), Duration::seconds(60));
        assert_eq!(lock.effective_ttl(Some(Duration::seconds(5))), Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_lease_expires_exactly_at_ttl() {
        let (lock, clock, _dir) = lock_with_clock(Duration::seconds(10)).await;
        lock.acquire("k", None).await.unwrap();

        clock.advance(Duration::milliseconds(9_999));
        let err = lock.acquire("k", None).await.unwrap_err();
        match err {
            StoreError::Locked { remaining_ms, .. } => assert_eq!(remaining_ms, 1),
            other => panic!("unexpected error: {other:?}"),
        }

        clock.advance(Duration::milliseconds(1));
        lock.acquire("k", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_purges_other_expired_leases() {
        let (lock, clock, _dir) = lock_with_clock(Duration::seconds(1)).await;
        lock.acquire("a", None).await.unwrap();
        lock.acquire("b", None).await.unwrap();
        clock.advance(Duration::seconds(2));

        lock.acquire("c", None).await.unwrap();

        assert!(lock.backend.get_lease("a").await.unwrap().is_none());
        assert!(lock.backend.get_lease("b").await.unwrap().is_none());
        assert!(lock.backend.get_lease("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reclaim_moves_expiry_forward() {
        let (lock, clock, _dir) = lock_with_clock(Duration::seconds(1)).await;
        lock.acquire("k", None).await.unwrap();
        // Keep the stale row in place: the reclaim path, not housekeeping, must take it.
        clock.advance(Duration::seconds(5));
        let now = clock.now_ms().await.unwrap();
        assert!(
            lock.backend
                .reclaim_expired_lease("k", now + 30_000, now)
                .await
                .unwrap()
        );
        assert!(
            !lock
                .backend
                .reclaim_expired_lease("k", now + 30_000, now)
                .await
                .unwrap(),
            "a live lease must not be reclaimed twice"
        );
        let lease = lock.backend.get_lease("k").await.unwrap().unwrap();
        assert_eq!(lease.expire_at, now + 30_000);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected_and_release_ignores_it() {
        let (lock, _clock, _dir) = lock_with_clock(Duration::seconds(1)).await;
        assert!(matches!(
            lock.acquire("", None).await,
            Err(StoreError::InvalidKey(_))
        ));
        lock.release("").await;
    }
}
