//! Periodic queue-invariant repair.
//!
//! Delegates are unreliable: they disconnect, crash, or silently drop a
//! task after acquiring it. The reaper is the sole repair mechanism for
//! the damage that causes. It runs on a fixed interval under a
//! distributed lock (bounded try-acquire; an unavailable lock skips the
//! cycle), and each phase isolates failures so one bad record cannot
//! halt the pass.

use std::sync::Arc;

use relay_core::clock::Clock;
use relay_core::outcome::TaskOutcome;
use relay_core::task_events::EVENT_TASK_FINISHED;
use relay_core::wait::WaitRegistry;
use relay_db::lock::SweepLock;
use relay_db::store::{CompleteOutcome, TaskStore};
use relay_events::{DispatchEvent, EventBus};
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::engine::sync_cache::SyncTaskCache;
use crate::ws::broadcast::TaskBroadcaster;

/// Periodic sweep that repairs queue invariants.
pub struct TaskReaper {
    store: Arc<dyn TaskStore>,
    waits: Arc<WaitRegistry>,
    sync_cache: Arc<SyncTaskCache>,
    broadcaster: TaskBroadcaster,
    lock: Arc<dyn SweepLock>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl TaskReaper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TaskStore>,
        waits: Arc<WaitRegistry>,
        sync_cache: Arc<SyncTaskCache>,
        broadcaster: TaskBroadcaster,
        lock: Arc<dyn SweepLock>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            waits,
            sync_cache,
            broadcaster,
            lock,
            bus,
            clock,
            config,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.config.sweep_interval_secs));
        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            "Task reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Task reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Reaper sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep cycle. Returns `false` when the distributed lock was
    /// unavailable and the cycle was skipped.
    pub async fn sweep(&self) -> Result<bool, relay_db::store::StoreError> {
        let Some(guard) = self.lock.try_acquire().await? else {
            tracing::debug!("Sweep lock unavailable; skipping this cycle");
            return Ok(false);
        };

        // Phases are independent: each logs and swallows its own
        // failures so the later phases still run.
        self.release_stuck_owners().await;
        self.fail_started_timeouts().await;
        self.fail_expired_queued().await;
        self.sweep_sync_cache().await;
        self.rebroadcast_unowned().await;

        guard.release().await;
        Ok(true)
    }

    /// Phase 1: QUEUED tasks whose owner went silent are returned to the
    /// unassigned pool and re-announced.
    async fn release_stuck_owners(&self) {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::seconds(self.config.owner_reclaim_secs);

        match self.store.release_stuck_owners(cutoff, now).await {
            Ok(released) => {
                for task in released {
                    tracing::info!(
                        task_id = %task.id,
                        "Reclaimed stuck owner; task returned to the pool",
                    );
                    self.broadcaster.announce_task(&task).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "Stuck-owner release failed"),
        }
    }

    /// Phase 2: STARTED tasks past their execution budget are forced to
    /// ERROR and their waiters notified with an explicit timeout cause.
    async fn fail_started_timeouts(&self) {
        let now = self.clock.now();
        let candidates = match self.store.started_timed_out(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Started-timeout scan failed");
                return;
            }
        };

        for task in candidates {
            let cause = format!(
                "Delegate did not complete the task within its {} ms budget",
                task.timeout_ms
            );
            self.force_fail_and_notify(task.id, &cause).await;
        }
    }

    /// Phase 3: QUEUED tasks older than the global ceiling are
    /// force-failed regardless of their per-task budget.
    async fn fail_expired_queued(&self) {
        let now = self.clock.now();
        let candidates = match self.store.queued_expired(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Queued-ceiling scan failed");
                return;
            }
        };

        for task in candidates {
            self.sync_cache.remove(task.id).await;
            self.force_fail_and_notify(
                task.id,
                "No delegate acquired the task before the queued ceiling elapsed",
            )
            .await;
        }
    }

    /// Phase 4: evict sync-cache entries past their TTL and re-announce
    /// the entries still waiting for a claim.
    async fn sweep_sync_cache(&self) {
        let now = self.clock.now();
        let ttl = chrono::Duration::seconds(self.config.sync_cache_ttl_secs);
        let sweep = self.sync_cache.sweep(ttl, now).await;

        if !sweep.evicted.is_empty() {
            tracing::debug!(count = sweep.evicted.len(), "Evicted expired sync cache entries");
        }

        for task_id in sweep.unclaimed {
            match self.store.get(task_id).await {
                Ok(Some(task)) if !task.is_terminal() && task.delegate_id.is_none() => {
                    self.broadcaster.announce_task(&task).await;
                }
                Ok(_) => {
                    // Claimed or finished elsewhere (possibly by another
                    // replica) -- the cache entry has served its purpose.
                    self.sync_cache.remove(task_id).await;
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Sync cache refresh failed");
                }
            }
        }
    }

    /// Phase 5: re-announce every unowned QUEUED task so freshly
    /// (re)connected delegates need not wait for their own poll cycle.
    async fn rebroadcast_unowned(&self) {
        match self.store.unowned_queued(self.config.rebroadcast_batch).await {
            Ok(tasks) => {
                let mut delivered = 0usize;
                let count = tasks.len();
                for task in tasks {
                    delivered += self.broadcaster.announce_task(&task).await;
                }
                if count > 0 {
                    tracing::debug!(count, delivered, "Rebroadcast unowned queued tasks");
                }
            }
            Err(e) => tracing::error!(error = %e, "Unowned-queued scan failed"),
        }
    }

    /// Force a task to ERROR and resume its waiter, tolerating races
    /// with real completions (the conditional update loses, we drop it).
    async fn force_fail_and_notify(&self, task_id: uuid::Uuid, cause: &str) {
        match self.store.force_fail(task_id, cause, self.clock.now()).await {
            Ok(CompleteOutcome::Applied(task)) => {
                tracing::warn!(task_id = %task.id, cause, "Reaper forced task to ERROR");
                self.waits
                    .notify(task.wait_id, TaskOutcome::error(cause))
                    .await;
                self.bus.publish(
                    DispatchEvent::new(EVENT_TASK_FINISHED)
                        .for_account(&task.account_id)
                        .for_task(task.id)
                        .with_payload(serde_json::json!({ "stage": "finished" })),
                );
            }
            Ok(CompleteOutcome::Lost) => {
                tracing::debug!(task_id = %task_id, "Force-fail lost to a real completion");
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Force-fail failed");
            }
        }
    }
}
