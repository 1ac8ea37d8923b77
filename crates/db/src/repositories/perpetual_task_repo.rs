//! Postgres implementation of [`PerpetualTaskStore`].

use async_trait::async_trait;
use relay_core::types::Timestamp;
use uuid::Uuid;

use crate::models::perpetual_task::PerpetualTaskRecord;
use crate::models::status::PerpetualTaskState;
use crate::store::{AssignOutcome, NewPerpetualTask, PerpetualTaskStore, StoreError};
use crate::DbPool;

/// Column list for `perpetual_tasks` queries.
const COLUMNS: &str = "\
    id, account_id, task_type, interval_ms, client_context, \
    assigned_delegate_id, last_heartbeat_at, state_id, created_at, last_updated_at";

/// Provides durable perpetual-task storage backed by Postgres.
pub struct PerpetualTaskRepo {
    pool: DbPool,
}

impl PerpetualTaskRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PerpetualTaskStore for PerpetualTaskRepo {
    async fn create(&self, input: NewPerpetualTask) -> Result<PerpetualTaskRecord, StoreError> {
        let query = format!(
            "INSERT INTO perpetual_tasks \
                 (id, account_id, task_type, interval_ms, client_context, state_id, \
                  created_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             RETURNING {COLUMNS}"
        );
        let record = sqlx::query_as::<_, PerpetualTaskRecord>(&query)
            .bind(Uuid::now_v7())
            .bind(&input.account_id)
            .bind(&input.task_type)
            .bind(input.interval_ms)
            .bind(&input.client_context)
            .bind(PerpetualTaskState::Unassigned.id())
            .bind(input.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PerpetualTaskRecord>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM perpetual_tasks WHERE id = $1");
        match sqlx::query_as::<_, PerpetualTaskRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(record) => Ok(record),
            Err(e @ sqlx::Error::ColumnDecode { .. }) => {
                tracing::warn!(
                    perpetual_task_id = %id,
                    error = %e,
                    "Deleting undecodable perpetual task row",
                );
                sqlx::query("DELETE FROM perpetual_tasks WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        account_id: Option<&str>,
    ) -> Result<Vec<PerpetualTaskRecord>, StoreError> {
        let records = if let Some(account_id) = account_id {
            let query = format!(
                "SELECT {COLUMNS} FROM perpetual_tasks \
                 WHERE account_id = $1 \
                 ORDER BY created_at DESC"
            );
            sqlx::query_as::<_, PerpetualTaskRecord>(&query)
                .bind(account_id)
                .fetch_all(&self.pool)
                .await?
        } else {
            let query = format!(
                "SELECT {COLUMNS} FROM perpetual_tasks ORDER BY created_at DESC"
            );
            sqlx::query_as::<_, PerpetualTaskRecord>(&query)
                .fetch_all(&self.pool)
                .await?
        };
        Ok(records)
    }

    async fn find_duplicate(
        &self,
        account_id: &str,
        task_type: &str,
        client_context: &serde_json::Value,
    ) -> Result<Option<PerpetualTaskRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM perpetual_tasks \
             WHERE account_id = $1 AND task_type = $2 AND client_context = $3 \
             LIMIT 1"
        );
        Ok(sqlx::query_as::<_, PerpetualTaskRecord>(&query)
            .bind(account_id)
            .bind(task_type)
            .bind(client_context)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM perpetual_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn assign(
        &self,
        id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<AssignOutcome, StoreError> {
        let query = format!(
            "UPDATE perpetual_tasks \
             SET state_id = $3, assigned_delegate_id = $2, last_heartbeat_at = $4, \
                 last_updated_at = $4 \
             WHERE id = $1 AND state_id = $5 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, PerpetualTaskRecord>(&query)
            .bind(id)
            .bind(delegate_id)
            .bind(PerpetualTaskState::Assigned.id())
            .bind(now)
            .bind(PerpetualTaskState::Unassigned.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(record) => AssignOutcome::Assigned(record),
            None => AssignOutcome::Lost,
        })
    }

    async fn release(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE perpetual_tasks \
             SET state_id = $2, assigned_delegate_id = NULL, last_heartbeat_at = NULL, \
                 last_updated_at = $3 \
             WHERE id = $1 AND state_id = $4",
        )
        .bind(id)
        .bind(PerpetualTaskState::Unassigned.id())
        .bind(now)
        .bind(PerpetualTaskState::Assigned.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE perpetual_tasks \
             SET state_id = $2, assigned_delegate_id = NULL, last_heartbeat_at = NULL, \
                 last_updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(PerpetualTaskState::Unassigned.id())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pause(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE perpetual_tasks \
             SET state_id = $2, assigned_delegate_id = NULL, last_heartbeat_at = NULL, \
                 last_updated_at = $3 \
             WHERE id = $1 AND state_id IN ($4, $5)",
        )
        .bind(id)
        .bind(PerpetualTaskState::Paused.id())
        .bind(now)
        .bind(PerpetualTaskState::Unassigned.id())
        .bind(PerpetualTaskState::Assigned.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn resume(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE perpetual_tasks \
             SET state_id = $2, last_updated_at = $3 \
             WHERE id = $1 AND state_id = $4",
        )
        .bind(id)
        .bind(PerpetualTaskState::Unassigned.id())
        .bind(now)
        .bind(PerpetualTaskState::Paused.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(
        &self,
        id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE perpetual_tasks \
             SET last_heartbeat_at = $3, last_updated_at = $3 \
             WHERE id = $1 AND assigned_delegate_id = $2 AND state_id = $4",
        )
        .bind(id)
        .bind(delegate_id)
        .bind(now)
        .bind(PerpetualTaskState::Assigned.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unassigned(&self) -> Result<Vec<PerpetualTaskRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM perpetual_tasks \
             WHERE state_id = $1 \
             ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, PerpetualTaskRecord>(&query)
            .bind(PerpetualTaskState::Unassigned.id())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn stale_assigned(
        &self,
        missed_multiple: i64,
        now: Timestamp,
    ) -> Result<Vec<PerpetualTaskRecord>, StoreError> {
        // A record that has never heartbeated falls back to its last
        // update time, so a delegate that dies right after assignment is
        // still reclaimed.
        let query = format!(
            "SELECT {COLUMNS} FROM perpetual_tasks \
             WHERE state_id = $1 \
                   AND COALESCE(last_heartbeat_at, last_updated_at) \
                       + make_interval(secs => \
                             (interval_ms * $2)::double precision / 1000.0) < $3"
        );
        Ok(sqlx::query_as::<_, PerpetualTaskRecord>(&query)
            .bind(PerpetualTaskState::Assigned.id())
            .bind(missed_multiple)
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }
}
