//! Postgres implementation of [`TaskStore`].
//!
//! Every lease transition is a single conditional UPDATE whose WHERE
//! clause encodes the allowed prior state; `rows_affected == 0` (or an
//! empty RETURNING set) is the silent lost-race signal shared by all
//! manager replicas.

use async_trait::async_trait;
use relay_core::types::Timestamp;
use uuid::Uuid;

use crate::models::status::TaskStatus;
use crate::models::task::{Task, TaskListQuery};
use crate::store::{
    AcquireOutcome, CancelOutcome, CompleteOutcome, NewTask, StoreError, TaskStore,
};
use crate::DbPool;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, account_id, app_id, task_type, parameters, required_capabilities, \
    lane_id, status_id, delegate_id, wait_id, result, error_message, \
    timeout_ms, created_at, last_updated_at, expires_at";

/// Maximum page size for task listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for task listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides durable task storage backed by Postgres.
pub struct TaskRepo {
    pool: DbPool,
}

impl TaskRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for TaskRepo {
    async fn submit(&self, input: NewTask) -> Result<Task, StoreError> {
        let query = format!(
            "INSERT INTO tasks \
                 (id, account_id, app_id, task_type, parameters, required_capabilities, \
                  lane_id, status_id, wait_id, timeout_ms, created_at, last_updated_at, \
                  expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, $12) \
             RETURNING {COLUMNS}"
        );
        let task = sqlx::query_as::<_, Task>(&query)
            .bind(Uuid::now_v7())
            .bind(&input.account_id)
            .bind(&input.app_id)
            .bind(&input.task_type)
            .bind(&input.parameters)
            .bind(serde_json::Value::from(input.required_capabilities.clone()))
            .bind(input.lane.id())
            .bind(TaskStatus::Queued.id())
            .bind(input.wait_id)
            .bind(input.timeout_ms)
            .bind(input.created_at)
            .bind(input.expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        match sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(task) => Ok(task),
            // A row that cannot be decoded (version skew) is defensively
            // deleted rather than poisoning every future read.
            Err(e @ sqlx::Error::ColumnDecode { .. }) => {
                tracing::warn!(task_id = %id, error = %e, "Deleting undecodable task row");
                sqlx::query("DELETE FROM tasks WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, params: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.account_id.is_some() {
            conditions.push(format!("account_id = ${bind_idx}"));
            bind_idx += 1;
        }

        if params.status_id.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             {where_clause} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Task>(&query);

        if let Some(account_id) = &params.account_id {
            q = q.bind(account_id);
        }
        if let Some(status_id) = params.status_id {
            q = q.bind(status_id);
        }

        q = q.bind(limit).bind(offset);

        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn acquire(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<AcquireOutcome, StoreError> {
        let query = format!(
            "UPDATE tasks \
             SET delegate_id = $2, last_updated_at = $3 \
             WHERE id = $1 AND status_id = $4 AND delegate_id IS NULL \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, Task>(&query)
            .bind(task_id)
            .bind(delegate_id)
            .bind(now)
            .bind(TaskStatus::Queued.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(task) => AcquireOutcome::Acquired(task),
            None => AcquireOutcome::Lost,
        })
    }

    async fn mark_started(
        &self,
        task_id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks \
             SET status_id = $3, last_updated_at = $4 \
             WHERE id = $1 AND delegate_id = $2 AND status_id = $5",
        )
        .bind(task_id)
        .bind(delegate_id)
        .bind(TaskStatus::Started.id())
        .bind(now)
        .bind(TaskStatus::Queued.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
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

        let query = format!(
            "UPDATE tasks \
             SET status_id = $3, result = $4, error_message = $5, last_updated_at = $6 \
             WHERE id = $1 AND delegate_id = $2 AND status_id IN ($7, $8) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, Task>(&query)
            .bind(task_id)
            .bind(delegate_id)
            .bind(status.id())
            .bind(result)
            .bind(error_message)
            .bind(now)
            .bind(TaskStatus::Queued.id())
            .bind(TaskStatus::Started.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(task) => CompleteOutcome::Applied(task),
            None => CompleteOutcome::Lost,
        })
    }

    async fn cancel(&self, task_id: Uuid, now: Timestamp) -> Result<CancelOutcome, StoreError> {
        // Optimistic read-then-guard: the UPDATE only applies if the row
        // is still exactly as observed, so a racing completion wins.
        let Some(observed) = self.get(task_id).await? else {
            return Ok(CancelOutcome::AlreadyTerminal);
        };
        if observed.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        let stage = observed.stage();

        let result = sqlx::query(
            "UPDATE tasks \
             SET status_id = $2, last_updated_at = $3 \
             WHERE id = $1 AND status_id = $4 \
                   AND delegate_id IS NOT DISTINCT FROM $5",
        )
        .bind(task_id)
        .bind(TaskStatus::Aborted.id())
        .bind(now)
        .bind(observed.status_id)
        .bind(&observed.delegate_id)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            CancelOutcome::Cancelled { stage }
        } else {
            CancelOutcome::AlreadyTerminal
        })
    }

    async fn force_fail(
        &self,
        task_id: Uuid,
        error_message: &str,
        now: Timestamp,
    ) -> Result<CompleteOutcome, StoreError> {
        let query = format!(
            "UPDATE tasks \
             SET status_id = $2, error_message = $3, last_updated_at = $4 \
             WHERE id = $1 AND status_id IN ($5, $6) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, Task>(&query)
            .bind(task_id)
            .bind(TaskStatus::Error.id())
            .bind(error_message)
            .bind(now)
            .bind(TaskStatus::Queued.id())
            .bind(TaskStatus::Started.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(task) => CompleteOutcome::Applied(task),
            None => CompleteOutcome::Lost,
        })
    }

    async fn release_stuck_owners(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "UPDATE tasks \
             SET delegate_id = NULL, last_updated_at = $1 \
             WHERE status_id = $2 AND delegate_id IS NOT NULL AND last_updated_at < $3 \
             RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(now)
            .bind(TaskStatus::Queued.id())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn started_timed_out(&self, now: Timestamp) -> Result<Vec<Task>, StoreError> {
        // Strict comparison: a task at exactly `last_updated_at +
        // timeout_ms` is not yet eligible.
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = $1 \
                   AND last_updated_at \
                       + make_interval(secs => timeout_ms::double precision / 1000.0) < $2"
        );
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Started.id())
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn queued_expired(&self, now: Timestamp) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks WHERE status_id = $1 AND expires_at < $2"
        );
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Queued.id())
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn unowned_queued(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = $1 AND delegate_id IS NULL \
             ORDER BY created_at ASC \
             LIMIT $2"
        );
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Queued.id())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
