//! In-memory [`TaskStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::types::Timestamp;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::status::TaskStatus;
use crate::models::task::{Task, TaskListQuery};
use crate::store::{
    AcquireOutcome, CancelOutcome, CompleteOutcome, NewTask, StoreError, TaskStore,
};

/// Maximum page size for task listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for task listing.
const DEFAULT_LIMIT: i64 = 50;

/// Tasks held in a map behind an `RwLock`.
///
/// Single-process only; the conditional guards still make concurrent
/// in-process acquires race-safe, which is what the engine tests need.
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn submit(&self, input: NewTask) -> Result<Task, StoreError> {
        let task = Task {
            id: Uuid::now_v7(),
            account_id: input.account_id,
            app_id: input.app_id,
            task_type: input.task_type,
            parameters: input.parameters,
            required_capabilities: serde_json::Value::from(input.required_capabilities),
            lane_id: input.lane.id(),
            status_id: TaskStatus::Queued.id(),
            delegate_id: None,
            wait_id: input.wait_id,
            result: None,
            error_message: None,
            timeout_ms: input.timeout_ms,
            created_at: input.created_at,
            last_updated_at: input.created_at,
            expires_at: input.expires_at,
        };
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list(&self, params: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT).max(0) as usize;
        let offset = params.offset.unwrap_or(0).max(0) as usize;

        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| {
                params
                    .account_id
                    .as_ref()
                    .is_none_or(|acct| &t.account_id == acct)
                    && params.status_id.is_none_or(|s| t.status_id == s)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn acquire(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(AcquireOutcome::Lost);
        };
        if task.status_id != TaskStatus::Queued.id() || task.delegate_id.is_some() {
            return Ok(AcquireOutcome::Lost);
        }
        task.delegate_id = Some(delegate_id.to_string());
        task.last_updated_at = now;
        Ok(AcquireOutcome::Acquired(task.clone()))
    }

    async fn mark_started(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.status_id != TaskStatus::Queued.id()
            || task.delegate_id.as_deref() != Some(delegate_id)
        {
            return Ok(false);
        }
        task.status_id = TaskStatus::Started.id();
        task.last_updated_at = now;
        Ok(true)
    }

    async fn complete(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
        now: Timestamp,
    ) -> Result<CompleteOutcome, StoreError> {
        debug_assert!(status.is_terminal());

        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(CompleteOutcome::Lost);
        };
        let non_terminal = task.status_id == TaskStatus::Queued.id()
            || task.status_id == TaskStatus::Started.id();
        if !non_terminal || task.delegate_id.as_deref() != Some(delegate_id) {
            return Ok(CompleteOutcome::Lost);
        }
        task.status_id = status.id();
        task.result = result;
        task.error_message = error_message;
        task.last_updated_at = now;
        Ok(CompleteOutcome::Applied(task.clone()))
    }

    async fn cancel(&self, task_id: Uuid, now: Timestamp) -> Result<CancelOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(CancelOutcome::AlreadyTerminal);
        };
        if task.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        let stage = task.stage();
        task.status_id = TaskStatus::Aborted.id();
        task.last_updated_at = now;
        Ok(CancelOutcome::Cancelled { stage })
    }

    async fn force_fail(
        &self,
        task_id: Uuid,
        error_message: &str,
        now: Timestamp,
    ) -> Result<CompleteOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(CompleteOutcome::Lost);
        };
        let non_terminal = task.status_id == TaskStatus::Queued.id()
            || task.status_id == TaskStatus::Started.id();
        if !non_terminal {
            return Ok(CompleteOutcome::Lost);
        }
        task.status_id = TaskStatus::Error.id();
        task.error_message = Some(error_message.to_string());
        task.last_updated_at = now;
        Ok(CompleteOutcome::Applied(task.clone()))
    }

    async fn release_stuck_owners(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.tasks.write().await;
        let mut released = Vec::new();
        for task in tasks.values_mut() {
            if task.status_id == TaskStatus::Queued.id()
                && task.delegate_id.is_some()
                && task.last_updated_at < cutoff
            {
                task.delegate_id = None;
                task.last_updated_at = now;
                released.push(task.clone());
            }
        }
        Ok(released)
    }

    async fn started_timed_out(&self, now: Timestamp) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| {
                t.status_id == TaskStatus::Started.id()
                    && t.last_updated_at + chrono::Duration::milliseconds(t.timeout_ms) < now
            })
            .cloned()
            .collect())
    }

    async fn queued_expired(&self, now: Timestamp) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.status_id == TaskStatus::Queued.id() && t.expires_at < now)
            .cloned()
            .collect())
    }

    async fn unowned_queued(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut queued: Vec<Task> = tasks
            .values()
            .filter(|t| t.status_id == TaskStatus::Queued.id() && t.delegate_id.is_none())
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        queued.truncate(limit.max(0) as usize);
        Ok(queued)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }
}
