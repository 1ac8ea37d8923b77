//! Distributed mutual exclusion for the reaper sweep.
//!
//! Exactly one manager replica may sweep at a time. Acquisition is
//! bounded and non-blocking: a replica that cannot get the lock within
//! the configured bound simply skips its cycle and tries again on the
//! next tick.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

use crate::store::StoreError;
use crate::DbPool;

/// PostgreSQL advisory lock ID for the reaper sweep.
/// Only one sweep can run at a time across all manager replicas.
pub const REAPER_LOCK_ID: i64 = 517_203_946;

/// A held sweep lock. Must be released explicitly once the sweep ends.
#[async_trait]
pub trait SweepGuard: Send {
    /// Release the lock. Failures are logged, not propagated -- the lock
    /// also dies with the underlying session.
    async fn release(self: Box<Self>);
}

/// Try-acquire-only distributed lock.
#[async_trait]
pub trait SweepLock: Send + Sync {
    /// Attempt to take the lock within the implementation's bound.
    ///
    /// `Ok(None)` means "someone else holds it (or acquisition timed
    /// out) -- skip this cycle"; it is never an error.
    async fn try_acquire(&self) -> Result<Option<Box<dyn SweepGuard>>, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres advisory-lock implementation
// ---------------------------------------------------------------------------

/// Session-scoped `pg_try_advisory_lock` wrapper.
///
/// The lock is tied to the dedicated connection held by the guard, so a
/// crashed replica releases it automatically when its session dies.
pub struct PgAdvisoryLock {
    pool: DbPool,
    lock_id: i64,
    /// Bound on waiting for a pooled connection; an exhausted pool
    /// counts as "lock unavailable", not an error.
    acquire_timeout: Duration,
}

impl PgAdvisoryLock {
    pub fn new(pool: DbPool, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            lock_id: REAPER_LOCK_ID,
            acquire_timeout,
        }
    }
}

#[async_trait]
impl SweepLock for PgAdvisoryLock {
    async fn try_acquire(&self) -> Result<Option<Box<dyn SweepGuard>>, StoreError> {
        let mut conn = match tokio::time::timeout(self.acquire_timeout, self.pool.acquire()).await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::debug!(
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "No pooled connection within the lock bound; skipping sweep"
                );
                return Ok(None);
            }
        };

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut *conn)
            .await?;

        if locked {
            Ok(Some(Box::new(PgSweepGuard {
                conn,
                lock_id: self.lock_id,
            })))
        } else {
            Ok(None)
        }
    }
}

struct PgSweepGuard {
    conn: PoolConnection<Postgres>,
    lock_id: i64,
}

#[async_trait]
impl SweepGuard for PgSweepGuard {
    async fn release(mut self: Box<Self>) {
        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .execute(&mut *self.conn)
            .await
        {
            // The session-scoped lock still dies with the connection.
            tracing::warn!(error = %e, "Failed to release reaper advisory lock");
        }
    }
}
