//! Short-lived cache of outstanding synchronous tasks.
//!
//! Sync-lane submissions are remembered here until a delegate claims
//! them, so the reaper can re-announce an unclaimed sync task quickly
//! instead of waiting for the global rebroadcast. Entries die on claim
//! or after a bounded TTL. The cache is per-process -- durable truth is
//! always the task store.

use std::collections::HashMap;

use relay_core::types::Timestamp;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A cached outstanding sync task.
#[derive(Debug, Clone)]
pub struct SyncCacheEntry {
    pub account_id: String,
    pub created_at: Timestamp,
}

/// Result of one maintenance sweep.
#[derive(Debug, Default)]
pub struct SyncCacheSweep {
    /// Entries dropped because they outlived the TTL.
    pub evicted: Vec<Uuid>,
    /// Entries still inside the TTL, candidates for re-announcement.
    pub unclaimed: Vec<Uuid>,
}

/// TTL'd map of task id → outstanding sync entry.
pub struct SyncTaskCache {
    entries: RwLock<HashMap<Uuid, SyncCacheEntry>>,
}

impl SyncTaskCache {
    /// Create a new, empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Remember an outstanding sync task.
    pub async fn insert(&self, task_id: Uuid, account_id: &str, now: Timestamp) {
        self.entries.write().await.insert(
            task_id,
            SyncCacheEntry {
                account_id: account_id.to_string(),
                created_at: now,
            },
        );
    }

    /// Drop an entry (claimed or finished). Unknown ids are a no-op.
    pub async fn remove(&self, task_id: Uuid) -> Option<SyncCacheEntry> {
        self.entries.write().await.remove(&task_id)
    }

    /// Evict entries past `ttl`, returning both the evicted ids and the
    /// ids still live (the latter are rebroadcast candidates).
    pub async fn sweep(&self, ttl: chrono::Duration, now: Timestamp) -> SyncCacheSweep {
        let mut entries = self.entries.write().await;
        let mut sweep = SyncCacheSweep::default();

        entries.retain(|task_id, entry| {
            if now - entry.created_at > ttl {
                sweep.evicted.push(*task_id);
                false
            } else {
                sweep.unclaimed.push(*task_id);
                true
            }
        });

        sweep
    }

    /// Number of outstanding entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for SyncTaskCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_removes_entry() {
        let cache = SyncTaskCache::new();
        let now = chrono::Utc::now();
        let id = Uuid::now_v7();

        cache.insert(id, "acct-1", now).await;
        assert_eq!(cache.len().await, 1);

        assert!(cache.remove(id).await.is_some());
        assert!(cache.is_empty().await);
        // Removing again is a no-op.
        assert!(cache.remove(id).await.is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired_entries() {
        let cache = SyncTaskCache::new();
        let start = chrono::Utc::now();
        let ttl = chrono::Duration::seconds(30);

        let old = Uuid::now_v7();
        let fresh = Uuid::now_v7();
        cache.insert(old, "acct-1", start).await;
        cache
            .insert(fresh, "acct-1", start + chrono::Duration::seconds(25))
            .await;

        let sweep = cache.sweep(ttl, start + chrono::Duration::seconds(31)).await;
        assert_eq!(sweep.evicted, vec![old]);
        assert_eq!(sweep.unclaimed, vec![fresh]);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_at_exact_ttl_keeps_entry() {
        let cache = SyncTaskCache::new();
        let start = chrono::Utc::now();
        let ttl = chrono::Duration::seconds(30);

        let id = Uuid::now_v7();
        cache.insert(id, "acct-1", start).await;

        // Exactly at the TTL bound the entry survives; strictly past it
        // the entry is evicted.
        let sweep = cache.sweep(ttl, start + ttl).await;
        assert!(sweep.evicted.is_empty());
        assert_eq!(sweep.unclaimed, vec![id]);
    }
}
