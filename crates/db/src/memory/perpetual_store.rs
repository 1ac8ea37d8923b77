//! In-memory [`PerpetualTaskStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::types::Timestamp;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::perpetual_task::PerpetualTaskRecord;
use crate::models::status::PerpetualTaskState;
use crate::store::{AssignOutcome, NewPerpetualTask, PerpetualTaskStore, StoreError};

/// Perpetual task records held in a map behind an `RwLock`.
pub struct MemoryPerpetualTaskStore {
    records: RwLock<HashMap<Uuid, PerpetualTaskRecord>>,
}

impl MemoryPerpetualTaskStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryPerpetualTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PerpetualTaskStore for MemoryPerpetualTaskStore {
    async fn create(&self, input: NewPerpetualTask) -> Result<PerpetualTaskRecord, StoreError> {
        let record = PerpetualTaskRecord {
            id: Uuid::now_v7(),
            account_id: input.account_id,
            task_type: input.task_type,
            interval_ms: input.interval_ms,
            client_context: input.client_context,
            assigned_delegate_id: None,
            last_heartbeat_at: None,
            state_id: PerpetualTaskState::Unassigned.id(),
            created_at: input.created_at,
            last_updated_at: input.created_at,
        };
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PerpetualTaskRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list(
        &self,
        account_id: Option<&str>,
    ) -> Result<Vec<PerpetualTaskRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matched: Vec<PerpetualTaskRecord> = records
            .values()
            .filter(|r| account_id.is_none_or(|acct| r.account_id == acct))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_duplicate(
        &self,
        account_id: &str,
        task_type: &str,
        client_context: &serde_json::Value,
    ) -> Result<Option<PerpetualTaskRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| {
                r.account_id == account_id
                    && r.task_type == task_type
                    && &r.client_context == client_context
            })
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn assign(
        &self,
        id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<AssignOutcome, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(AssignOutcome::Lost);
        };
        if record.state_id != PerpetualTaskState::Unassigned.id() {
            return Ok(AssignOutcome::Lost);
        }
        record.state_id = PerpetualTaskState::Assigned.id();
        record.assigned_delegate_id = Some(delegate_id.to_string());
        record.last_heartbeat_at = Some(now);
        record.last_updated_at = now;
        Ok(AssignOutcome::Assigned(record.clone()))
    }

    async fn release(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.state_id != PerpetualTaskState::Assigned.id() {
            return Ok(false);
        }
        record.state_id = PerpetualTaskState::Unassigned.id();
        record.assigned_delegate_id = None;
        record.last_heartbeat_at = None;
        record.last_updated_at = now;
        Ok(true)
    }

    async fn reset(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        record.state_id = PerpetualTaskState::Unassigned.id();
        record.assigned_delegate_id = None;
        record.last_heartbeat_at = None;
        record.last_updated_at = now;
        Ok(true)
    }

    async fn pause(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        let pausable = record.state_id == PerpetualTaskState::Unassigned.id()
            || record.state_id == PerpetualTaskState::Assigned.id();
        if !pausable {
            return Ok(false);
        }
        record.state_id = PerpetualTaskState::Paused.id();
        record.assigned_delegate_id = None;
        record.last_heartbeat_at = None;
        record.last_updated_at = now;
        Ok(true)
    }

    async fn resume(&self, id: Uuid, now: Timestamp) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.state_id != PerpetualTaskState::Paused.id() {
            return Ok(false);
        }
        record.state_id = PerpetualTaskState::Unassigned.id();
        record.last_updated_at = now;
        Ok(true)
    }

    async fn heartbeat(
        &self,
        id: Uuid,
        delegate_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.state_id != PerpetualTaskState::Assigned.id()
            || record.assigned_delegate_id.as_deref() != Some(delegate_id)
        {
            return Ok(false);
        }
        record.last_heartbeat_at = Some(now);
        record.last_updated_at = now;
        Ok(true)
    }

    async fn unassigned(&self) -> Result<Vec<PerpetualTaskRecord>, StoreError> {
        let records = self.records.read().await;
        let mut unassigned: Vec<PerpetualTaskRecord> = records
            .values()
            .filter(|r| r.state_id == PerpetualTaskState::Unassigned.id())
            .cloned()
            .collect();
        unassigned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(unassigned)
    }

    async fn stale_assigned(
        &self,
        missed_multiple: i64,
        now: Timestamp,
    ) -> Result<Vec<PerpetualTaskRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| {
                r.state_id == PerpetualTaskState::Assigned.id() && {
                    let last_seen = r.last_heartbeat_at.unwrap_or(r.last_updated_at);
                    last_seen + chrono::Duration::milliseconds(r.interval_ms * missed_multiple)
                        < now
                }
            })
            .cloned()
            .collect())
    }
}
