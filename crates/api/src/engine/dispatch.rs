//! Task submission, cancellation, and inbound-result orchestration.
//!
//! [`TaskDispatcher`] is the service object behind the caller-facing
//! task endpoints and the delegate stream's task messages. It composes
//! the task store, the wait/notify registry, the sync-task cache, the
//! per-account broadcaster, and the event bus. Race losers (acquire,
//! complete) are debug-logged no-ops, exactly as the store reports them.

use std::sync::Arc;
use std::time::Duration;

use relay_core::clock::Clock;
use relay_core::error::CoreError;
use relay_core::filter;
use relay_core::outcome::TaskOutcome;
use relay_core::task_events::{EVENT_TASK_FINISHED, EVENT_TASK_PROGRESS, EVENT_TASK_SUBMITTED};
use relay_core::wait::{WaitError, WaitRegistry};
use relay_db::models::status::{TaskLane, TaskStatus};
use relay_db::models::task::{SubmitTask, Task, TaskStage};
use relay_db::store::{AcquireOutcome, CancelOutcome, CompleteOutcome, NewTask, TaskStore};
use relay_events::{DispatchEvent, EventBus};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{AppError, AppResult};
use crate::engine::sync_cache::SyncTaskCache;
use crate::ws::broadcast::TaskBroadcaster;
use crate::ws::protocol::{ResultCode, TaskResultData};

/// Orchestrates the one-shot task lifecycle.
pub struct TaskDispatcher {
    store: Arc<dyn TaskStore>,
    waits: Arc<WaitRegistry>,
    sync_cache: Arc<SyncTaskCache>,
    broadcaster: TaskBroadcaster,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl TaskDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        waits: Arc<WaitRegistry>,
        sync_cache: Arc<SyncTaskCache>,
        broadcaster: TaskBroadcaster,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            waits,
            sync_cache,
            broadcaster,
            bus,
            clock,
            config,
        }
    }

    // -- Submission ----------------------------------------------------------

    /// Submit an asynchronous task: persist, announce, return immediately.
    pub async fn submit(&self, input: SubmitTask) -> AppResult<Task> {
        let task = self.persist(input, TaskLane::Async).await?;
        let delivered = self.broadcaster.announce_task(&task).await;
        tracing::debug!(task_id = %task.id, delivered, "Task announced");
        Ok(task)
    }

    /// Submit on the sync lane and block until the outcome or the task's
    /// own execution budget elapses.
    ///
    /// The wait is registered *before* the announcement so a completion
    /// can never slip between persist and register.
    pub async fn submit_and_wait(&self, input: SubmitTask) -> AppResult<(Task, TaskOutcome)> {
        let task = self.persist(input, TaskLane::Sync).await?;

        let handle = self.waits.register(task.wait_id, self.clock.now()).await;
        let delivered = self.broadcaster.announce_task(&task).await;
        tracing::debug!(task_id = %task.id, delivered, "Sync task announced");

        match handle.wait(Duration::from_millis(task.timeout_ms as u64)).await {
            Ok(outcome) => Ok((task, outcome)),
            Err(WaitError::TimedOut(_)) => {
                // The queue entry stays behind for the reaper; only the
                // caller-side suspension ends here.
                self.sync_cache.remove(task.id).await;
                Err(AppError::WaitTimeout(format!(
                    "No delegate completed task {} within {} ms",
                    task.id, task.timeout_ms
                )))
            }
            Err(WaitError::Discarded) => Err(AppError::InternalError(format!(
                "Wait instance for task {} was discarded before completion",
                task.id
            ))),
        }
    }

    /// Validate and persist a new task as QUEUED / owner-less.
    async fn persist(&self, input: SubmitTask, lane: TaskLane) -> AppResult<Task> {
        filter::validate_party_id("account", &input.account_id)?;
        if input.task_type.is_empty() {
            return Err(CoreError::Validation("task_type must not be empty".into()).into());
        }
        filter::validate_capabilities(&input.required_capabilities)?;

        let timeout_ms = input
            .timeout_ms
            .unwrap_or(self.config.default_task_timeout_ms);
        if timeout_ms <= 0 || timeout_ms > self.config.max_task_timeout_ms {
            return Err(AppError::BadRequest(format!(
                "timeout_ms must be between 1 and {}",
                self.config.max_task_timeout_ms
            )));
        }

        let now = self.clock.now();
        let task = self
            .store
            .submit(NewTask {
                account_id: input.account_id,
                app_id: input.app_id,
                task_type: input.task_type,
                parameters: input.parameters,
                required_capabilities: input.required_capabilities,
                lane,
                timeout_ms,
                wait_id: Uuid::now_v7(),
                created_at: now,
                expires_at: now + chrono::Duration::seconds(self.config.queued_ceiling_secs),
            })
            .await?;

        if lane == TaskLane::Sync {
            self.sync_cache.insert(task.id, &task.account_id, now).await;
        }

        tracing::info!(
            task_id = %task.id,
            account_id = %task.account_id,
            task_type = %task.task_type,
            "Task submitted",
        );
        self.publish_stage(&task, EVENT_TASK_SUBMITTED);

        Ok(task)
    }

    // -- Cancellation --------------------------------------------------------

    /// Cancel a task if it has not yet reached a terminal status.
    ///
    /// Returns the stage the task was caught at. A cancellation that
    /// loses to a concurrent completion surfaces as `Conflict` -- the
    /// caller already has (or will get) the real outcome. Cancellation
    /// never interrupts in-flight delegate-side execution; the delegate
    /// learns about it when its own result is discarded.
    pub async fn cancel(&self, task_id: Uuid) -> AppResult<TaskStage> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Task",
                id: task_id.to_string(),
            })?;

        match self.store.cancel(task_id, self.clock.now()).await? {
            CancelOutcome::Cancelled { stage } => {
                self.waits.notify(task.wait_id, TaskOutcome::Aborted).await;
                self.sync_cache.remove(task_id).await;
                if let Ok(Some(aborted)) = self.store.get(task_id).await {
                    self.publish_stage(&aborted, EVENT_TASK_FINISHED);
                }
                tracing::info!(task_id = %task_id, stage = stage.as_str(), "Task cancelled");
                Ok(stage)
            }
            CancelOutcome::AlreadyTerminal => Err(CoreError::Conflict(
                "Task is already in a terminal state and cannot be cancelled".into(),
            )
            .into()),
        }
    }

    // -- Inbound delegate messages -------------------------------------------

    /// A delegate asks to own an announced task.
    ///
    /// Returns the task payload for the winner; losers get `None` and no
    /// reply at all (the announcement fan-out makes lost races routine).
    pub async fn handle_acquire(
        &self,
        task_id: Uuid,
        delegate_id: &str,
    ) -> AppResult<Option<Task>> {
        match self.store.acquire(task_id, delegate_id, self.clock.now()).await? {
            AcquireOutcome::Acquired(task) => {
                self.sync_cache.remove(task.id).await;
                self.publish_stage(&task, EVENT_TASK_PROGRESS);
                tracing::info!(task_id = %task.id, delegate_id, "Task acquired");
                Ok(Some(task))
            }
            AcquireOutcome::Lost => {
                tracing::debug!(task_id = %task_id, delegate_id, "Acquire race lost");
                Ok(None)
            }
        }
    }

    /// A delegate reports that execution has begun.
    pub async fn handle_started(&self, task_id: Uuid, delegate_id: &str) -> AppResult<bool> {
        let started = self
            .store
            .mark_started(task_id, delegate_id, self.clock.now())
            .await?;
        if started {
            if let Some(task) = self.store.get(task_id).await? {
                self.publish_stage(&task, EVENT_TASK_PROGRESS);
            }
            tracing::debug!(task_id = %task_id, delegate_id, "Task started");
        } else {
            tracing::debug!(task_id = %task_id, delegate_id, "Stale task_started ignored");
        }
        Ok(started)
    }

    /// A delegate reports a terminal result.
    ///
    /// The terminal transition is owner-checked in the store; a mismatch
    /// (reclaimed lease, duplicate report) is discarded as a lost race.
    pub async fn handle_result(
        &self,
        delegate_id: &str,
        data: &TaskResultData,
    ) -> AppResult<bool> {
        let (status, result, error_message) = match data.code {
            ResultCode::Success => (TaskStatus::Success, data.result.clone(), None),
            ResultCode::Error => (
                TaskStatus::Error,
                None,
                Some(
                    data.error_message
                        .clone()
                        .unwrap_or_else(|| "Delegate reported an unspecified error".to_string()),
                ),
            ),
            ResultCode::Aborted => (TaskStatus::Aborted, None, None),
        };

        match self
            .store
            .complete(
                data.task_id,
                delegate_id,
                status,
                result,
                error_message,
                self.clock.now(),
            )
            .await?
        {
            CompleteOutcome::Applied(task) => {
                let outcome = task
                    .outcome()
                    .unwrap_or_else(|| TaskOutcome::error("Task finished without an outcome"));
                self.waits.notify(task.wait_id, outcome).await;
                self.sync_cache.remove(task.id).await;
                self.publish_stage(&task, EVENT_TASK_FINISHED);
                tracing::info!(
                    task_id = %task.id,
                    delegate_id,
                    status_id = task.status_id,
                    "Task finished",
                );
                Ok(true)
            }
            CompleteOutcome::Lost => {
                tracing::debug!(
                    task_id = %data.task_id,
                    delegate_id,
                    "Stale task_result discarded",
                );
                Ok(false)
            }
        }
    }

    // -- Events --------------------------------------------------------------

    fn publish_stage(&self, task: &Task, event_type: &str) {
        self.bus.publish(
            DispatchEvent::new(event_type)
                .for_account(&task.account_id)
                .for_task(task.id)
                .with_payload(serde_json::json!({ "stage": task.stage().as_str() })),
        );
    }
}
