//! Abstract storage seams the dispatch engine runs against.
//!
//! Manager replicas never trust each other's memory: every cross-replica
//! mutation is a conditional update against shared durable state, and
//! losing a race is an expected, explicitly-modeled outcome -- never an
//! error. The engine is written against these traits; production wiring
//! injects the Postgres implementations from [`crate::repositories`] and
//! tests inject the in-memory implementations from [`crate::memory`].

use async_trait::async_trait;
use relay_core::types::Timestamp;
use uuid::Uuid;

use crate::models::perpetual_task::PerpetualTaskRecord;
use crate::models::status::{TaskLane, TaskStatus};
use crate::models::task::{Task, TaskListQuery, TaskStage};

/// Errors surfaced by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Race outcomes
// ---------------------------------------------------------------------------

/// Result of a conditional acquire.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// This delegate now owns the task.
    Acquired(Task),
    /// Another delegate won, or the task left the queued state.
    Lost,
}

/// Result of an owner-checked terminal transition.
#[derive(Debug)]
pub enum CompleteOutcome {
    /// The terminal status was applied; the updated row is returned.
    Applied(Task),
    /// The caller no longer owns the task, or it was already terminal.
    Lost,
}

/// Result of a cancellation attempt.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The task was aborted; `stage` is where it was caught.
    Cancelled { stage: TaskStage },
    /// A terminal transition (or a concurrent one) got there first.
    AlreadyTerminal,
}

/// Result of a conditional perpetual-task assignment.
#[derive(Debug)]
pub enum AssignOutcome {
    /// The record is now assigned to the delegate.
    Assigned(PerpetualTaskRecord),
    /// Another replica assigned it first, or the record left UNASSIGNED.
    Lost,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Input for persisting a new task. Ids are generated by the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub account_id: String,
    pub app_id: Option<String>,
    pub task_type: String,
    pub parameters: serde_json::Value,
    pub required_capabilities: Vec<String>,
    pub lane: TaskLane,
    pub timeout_ms: i64,
    pub wait_id: Uuid,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Input for persisting a new perpetual task record.
#[derive(Debug, Clone)]
pub struct NewPerpetualTask {
    pub account_id: String,
    pub task_type: String,
    pub interval_ms: i64,
    pub client_context: serde_json::Value,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Task store
// ---------------------------------------------------------------------------

/// Durable task collection with atomic conditional updates.
///
/// All methods take `now` from the caller's injected clock so lease
/// arithmetic is deterministic under test.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task as QUEUED and owner-less.
    async fn submit(&self, input: NewTask) -> Result<Task, StoreError>;

    /// Fetch a task by id.
    async fn get(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// List tasks, newest first, with optional filters and pagination.
    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError>;

    /// Conditionally take ownership: succeeds only while the task is
    /// QUEUED with no owner. Refreshes `last_updated_at` on success.
    async fn acquire(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<AcquireOutcome, StoreError>;

    /// Owner-checked QUEUED → STARTED transition. Returns `false` when
    /// the caller is not the current owner.
    async fn mark_started(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Owner-checked terminal transition. `status` must be terminal.
    /// Mismatched owners and already-terminal rows lose silently.
    async fn complete(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
        now: Timestamp,
    ) -> Result<CompleteOutcome, StoreError>;

    /// Conditional QUEUED/STARTED → ABORTED transition. Loses to any
    /// concurrent terminal transition.
    async fn cancel(&self, task_id: Uuid, now: Timestamp) -> Result<CancelOutcome, StoreError>;

    /// Reaper-side forced failure, ignoring ownership. Conditional on
    /// the task still being non-terminal.
    async fn force_fail(
        &self,
        task_id: Uuid,
        error_message: &str,
        now: Timestamp,
    ) -> Result<CompleteOutcome, StoreError>;

    /// Clear the owner of every QUEUED task whose `last_updated_at` is
    /// before `cutoff`, returning the released rows.
    async fn release_stuck_owners(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Task>, StoreError>;

    /// STARTED tasks whose execution budget has elapsed: eligible
    /// strictly after `last_updated_at + timeout_ms`.
    async fn started_timed_out(&self, now: Timestamp) -> Result<Vec<Task>, StoreError>;

    /// QUEUED tasks past their queued-ceiling deadline.
    async fn queued_expired(&self, now: Timestamp) -> Result<Vec<Task>, StoreError>;

    /// Oldest-first QUEUED tasks with no owner, for rebroadcast.
    async fn unowned_queued(&self, limit: i64) -> Result<Vec<Task>, StoreError>;

    /// Remove a task row outright (defensive deletion of records that
    /// can no longer be interpreted).
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Perpetual task store
// ---------------------------------------------------------------------------

/// Durable perpetual-task records with conditional assignment.
#[async_trait]
pub trait PerpetualTaskStore: Send + Sync {
    /// Persist a new record in UNASSIGNED.
    async fn create(&self, input: NewPerpetualTask) -> Result<PerpetualTaskRecord, StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<PerpetualTaskRecord>, StoreError>;

    /// List records, optionally filtered by account, newest first.
    async fn list(&self, account_id: Option<&str>)
        -> Result<Vec<PerpetualTaskRecord>, StoreError>;

    /// Find an existing record with the same (account, type, context).
    async fn find_duplicate(
        &self,
        account_id: &str,
        task_type: &str,
        client_context: &serde_json::Value,
    ) -> Result<Option<PerpetualTaskRecord>, StoreError>;

    /// Delete a record outright.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Conditional UNASSIGNED → ASSIGNED transition.
    async fn assign(
        &self,
        id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<AssignOutcome, StoreError>;

    /// ASSIGNED → UNASSIGNED, clearing owner and heartbeat.
    async fn release(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError>;

    /// Force a record back to UNASSIGNED from any state, clearing owner
    /// and heartbeat.
    async fn reset(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError>;

    /// Move to PAUSED (from UNASSIGNED or ASSIGNED), clearing the owner.
    async fn pause(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError>;

    /// PAUSED → UNASSIGNED.
    async fn resume(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError>;

    /// Owner-checked heartbeat touch on an ASSIGNED record.
    async fn heartbeat(
        &self,
        id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// All UNASSIGNED records.
    async fn unassigned(&self) -> Result<Vec<PerpetualTaskRecord>, StoreError>;

    /// ASSIGNED records whose heartbeat is older than
    /// `interval_ms * missed_multiple`.
    async fn stale_assigned(
        &self,
        missed_multiple: i64,
        now: Timestamp,
    ) -> Result<Vec<PerpetualTaskRecord>, StoreError>;
}
