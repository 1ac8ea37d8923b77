//! Perpetual task lifecycle and the assignment loop.
//!
//! Perpetual tasks are never completed -- only assigned, reassigned,
//! paused, or deleted. A fixed-interval loop reclaims assignments whose
//! delegate went silent and hands unassigned records to connected
//! delegates round-robin. A record with no eligible delegate simply
//! stays UNASSIGNED; that is a waiting state, not an error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use relay_core::clock::Clock;
use relay_core::error::CoreError;
use relay_core::filter;
use relay_core::perpetual::PerpetualHandlerRegistry;
use relay_core::task_events::{EVENT_PERPETUAL_ASSIGNED, EVENT_PERPETUAL_RELEASED};
use relay_db::models::perpetual_task::{CreatePerpetualTask, PerpetualTaskRecord};
use relay_db::store::{AssignOutcome, NewPerpetualTask, PerpetualTaskStore};
use relay_events::{DispatchEvent, EventBus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{AppError, AppResult};
use crate::ws::broadcast::TaskBroadcaster;
use crate::ws::registry::DelegateRegistry;

/// Smallest allowed schedule interval.
const MIN_INTERVAL_MS: i64 = 1_000;

/// Manages perpetual task records and their fleet assignments.
pub struct PerpetualTaskService {
    store: Arc<dyn PerpetualTaskStore>,
    handlers: Arc<PerpetualHandlerRegistry>,
    registry: Arc<DelegateRegistry>,
    broadcaster: TaskBroadcaster,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
    /// Round-robin cursor, randomized at startup so replicas do not all
    /// favour the same delegate.
    cursor: AtomicUsize,
}

impl PerpetualTaskService {
    pub fn new(
        store: Arc<dyn PerpetualTaskStore>,
        handlers: Arc<PerpetualHandlerRegistry>,
        registry: Arc<DelegateRegistry>,
        broadcaster: TaskBroadcaster,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            handlers,
            registry,
            broadcaster,
            bus,
            clock,
            config,
            cursor: AtomicUsize::new(rand::rng().random_range(0..1024)),
        }
    }

    // -- Caller-facing lifecycle ---------------------------------------------

    /// Create a perpetual task record in UNASSIGNED.
    ///
    /// The context is validated by the registered type handler; an
    /// unknown type is a caller error. Unless `allow_duplicate` is set,
    /// an existing record with identical (account, type, context) is
    /// returned instead of creating a twin.
    pub async fn create(&self, input: CreatePerpetualTask) -> AppResult<PerpetualTaskRecord> {
        filter::validate_party_id("account", &input.account_id)?;

        let handler = self.handlers.get(&input.task_type).ok_or_else(|| {
            CoreError::Validation(format!(
                "Unknown perpetual task type '{}'; registered types: {}",
                input.task_type,
                self.handlers.registered_types().join(", ")
            ))
        })?;
        handler.validate(&input.client_context)?;

        if input.interval_ms < MIN_INTERVAL_MS {
            return Err(AppError::BadRequest(format!(
                "interval_ms must be at least {MIN_INTERVAL_MS}"
            )));
        }

        if !input.allow_duplicate {
            if let Some(existing) = self
                .store
                .find_duplicate(&input.account_id, &input.task_type, &input.client_context)
                .await?
            {
                tracing::debug!(
                    perpetual_task_id = %existing.id,
                    "Duplicate create suppressed; returning existing record",
                );
                return Ok(existing);
            }
        }

        let record = self
            .store
            .create(NewPerpetualTask {
                account_id: input.account_id,
                task_type: input.task_type,
                interval_ms: input.interval_ms,
                client_context: input.client_context,
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!(
            perpetual_task_id = %record.id,
            account_id = %record.account_id,
            task_type = %record.task_type,
            "Perpetual task created",
        );
        Ok(record)
    }

    /// Fetch a record, verifying account scope when one is supplied.
    pub async fn get(
        &self,
        id: Uuid,
        account_id: Option<&str>,
    ) -> AppResult<PerpetualTaskRecord> {
        let record = self.store.get(id).await?.ok_or(CoreError::NotFound {
            entity: "Perpetual task",
            id: id.to_string(),
        })?;
        if account_id.is_some_and(|acct| record.account_id != acct) {
            return Err(CoreError::NotFound {
                entity: "Perpetual task",
                id: id.to_string(),
            }
            .into());
        }
        Ok(record)
    }

    /// List records, optionally scoped to one account.
    pub async fn list(&self, account_id: Option<&str>) -> AppResult<Vec<PerpetualTaskRecord>> {
        Ok(self.store.list(account_id).await?)
    }

    /// Delete a record and tell its delegate (if any) to stop.
    pub async fn delete(&self, id: Uuid, account_id: Option<&str>) -> AppResult<()> {
        let record = self.get(id, account_id).await?;
        self.store.delete(id).await?;
        self.push_release(&record).await;
        tracing::info!(perpetual_task_id = %id, "Perpetual task deleted");
        Ok(())
    }

    /// Force a record back to UNASSIGNED; the next assignment cycle
    /// re-places it.
    pub async fn reset(&self, id: Uuid, account_id: Option<&str>) -> AppResult<()> {
        let record = self.get(id, account_id).await?;
        self.store.reset(id, self.clock.now()).await?;
        self.push_release(&record).await;
        self.publish_released(&record);
        tracing::info!(perpetual_task_id = %id, "Perpetual task reset");
        Ok(())
    }

    /// Pause a record: no assignment until resumed.
    pub async fn pause(&self, id: Uuid, account_id: Option<&str>) -> AppResult<()> {
        let record = self.get(id, account_id).await?;
        if !self.store.pause(id, self.clock.now()).await? {
            return Err(CoreError::Conflict("Perpetual task is already paused".into()).into());
        }
        self.push_release(&record).await;
        self.publish_released(&record);
        tracing::info!(perpetual_task_id = %id, "Perpetual task paused");
        Ok(())
    }

    /// Resume a paused record into UNASSIGNED.
    pub async fn resume(&self, id: Uuid, account_id: Option<&str>) -> AppResult<()> {
        self.get(id, account_id).await?;
        if !self.store.resume(id, self.clock.now()).await? {
            return Err(CoreError::Conflict("Perpetual task is not paused".into()).into());
        }
        tracing::info!(perpetual_task_id = %id, "Perpetual task resumed");
        Ok(())
    }

    /// Owner-checked heartbeat from the delegate stream.
    pub async fn record_heartbeat(&self, id: Uuid, delegate_id: &str) -> AppResult<bool> {
        let touched = self
            .store
            .heartbeat(id, delegate_id, self.clock.now())
            .await?;
        if !touched {
            tracing::debug!(
                perpetual_task_id = %id,
                delegate_id,
                "Stale perpetual heartbeat ignored",
            );
        }
        Ok(touched)
    }

    // -- Assignment loop -----------------------------------------------------

    /// Run the assignment loop until the cancellation token triggers.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.assign_interval_secs,
        ));
        tracing::info!(
            assign_interval_secs = self.config.assign_interval_secs,
            "Perpetual assignment loop started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Perpetual assignment loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.assign_cycle().await;
                }
            }
        }
    }

    /// One assignment cycle: reclaim stale assignments, then place
    /// unassigned records on connected delegates. Failures are isolated
    /// per record.
    pub async fn assign_cycle(&self) {
        self.reclaim_stale().await;
        self.assign_unassigned().await;
    }

    async fn reclaim_stale(&self) {
        let now = self.clock.now();
        let stale = match self
            .store
            .stale_assigned(self.config.missed_heartbeat_multiple, now)
            .await
        {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!(error = %e, "Stale-assignment scan failed");
                return;
            }
        };

        for record in stale {
            match self.store.release(record.id, now).await {
                Ok(true) => {
                    tracing::warn!(
                        perpetual_task_id = %record.id,
                        delegate_id = ?record.assigned_delegate_id,
                        "Reclaimed perpetual task from a silent delegate",
                    );
                    self.publish_released(&record);
                }
                Ok(false) => {
                    // Lost to a concurrent transition -- another replica
                    // got there first.
                    tracing::debug!(perpetual_task_id = %record.id, "Stale release lost");
                }
                Err(e) => {
                    tracing::error!(
                        perpetual_task_id = %record.id,
                        error = %e,
                        "Stale release failed",
                    );
                }
            }
        }
    }

    async fn assign_unassigned(&self) {
        let unassigned = match self.store.unassigned().await {
            Ok(unassigned) => unassigned,
            Err(e) => {
                tracing::error!(error = %e, "Unassigned scan failed");
                return;
            }
        };

        for record in unassigned {
            if let Err(e) = self.try_assign(&record).await {
                tracing::error!(
                    perpetual_task_id = %record.id,
                    error = %e,
                    "Assignment attempt failed",
                );
            }
        }
    }

    async fn try_assign(&self, record: &PerpetualTaskRecord) -> AppResult<()> {
        let candidates: Vec<_> = self
            .registry
            .connected_for_account(&record.account_id)
            .await
            .into_iter()
            .filter(|snapshot| snapshot.enabled)
            .collect();
        if candidates.is_empty() {
            // No connected fleet: the record waits, indefinitely if need
            // be, with no error.
            return Ok(());
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let candidate = &candidates[start];

        match self
            .store
            .assign(record.id, &candidate.delegate_id, self.clock.now())
            .await?
        {
            AssignOutcome::Assigned(assigned) => {
                let Some(handler) = self.handlers.get(&assigned.task_type) else {
                    // Version skew: a record for a type this replica no
                    // longer knows. Hand it back rather than pushing a
                    // descriptor we cannot build.
                    tracing::warn!(
                        perpetual_task_id = %assigned.id,
                        task_type = %assigned.task_type,
                        "No handler for assigned perpetual task; releasing",
                    );
                    self.store.release(assigned.id, self.clock.now()).await?;
                    return Ok(());
                };

                let params = handler.run_params(&assigned.client_context);
                self.broadcaster.send_perpetual_assign(&assigned, params).await;
                self.bus.publish(
                    DispatchEvent::new(EVENT_PERPETUAL_ASSIGNED)
                        .for_account(&assigned.account_id)
                        .for_perpetual_task(assigned.id)
                        .with_payload(serde_json::json!({
                            "delegate_id": assigned.assigned_delegate_id,
                        })),
                );
                tracing::info!(
                    perpetual_task_id = %assigned.id,
                    delegate_id = %candidate.delegate_id,
                    "Perpetual task assigned",
                );
            }
            AssignOutcome::Lost => {
                tracing::debug!(perpetual_task_id = %record.id, "Assignment race lost");
            }
        }
        Ok(())
    }

    // -- Helpers -------------------------------------------------------------

    async fn push_release(&self, record: &PerpetualTaskRecord) {
        if let Some(delegate_id) = record.assigned_delegate_id.as_deref() {
            self.broadcaster
                .send_perpetual_release(&record.account_id, delegate_id, record.id)
                .await;
        }
    }

    fn publish_released(&self, record: &PerpetualTaskRecord) {
        self.bus.publish(
            DispatchEvent::new(EVENT_PERPETUAL_RELEASED)
                .for_account(&record.account_id)
                .for_perpetual_task(record.id),
        );
    }
}
