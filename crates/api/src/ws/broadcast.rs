//! Per-account broadcast of task descriptors and targeted pushes.
//!
//! [`TaskBroadcaster`] composes the delegate registry with the pure
//! delivery filter: a descriptor reaches only connections whose
//! capabilities cover the task's requirements, and never a connection
//! other than the task's owner once one exists. The filter is pure and
//! idempotent, so concurrent evaluation against many connections is
//! safe by construction.

use std::sync::Arc;

use axum::extract::ws::Message;
use relay_core::filter;
use relay_core::task_events::{
    MSG_TYPE_PERPETUAL_ASSIGN, MSG_TYPE_PERPETUAL_RELEASE, MSG_TYPE_TASK_AVAILABLE,
    MSG_TYPE_TASK_PAYLOAD,
};
use relay_db::models::perpetual_task::PerpetualTaskRecord;
use relay_db::models::task::Task;
use serde_json::json;
use uuid::Uuid;

use crate::ws::registry::DelegateRegistry;

/// Fan-out of dispatch frames over delegate connections.
#[derive(Clone)]
pub struct TaskBroadcaster {
    registry: Arc<DelegateRegistry>,
}

impl TaskBroadcaster {
    pub fn new(registry: Arc<DelegateRegistry>) -> Self {
        Self { registry }
    }

    /// Announce a queued task on its account channel.
    ///
    /// The descriptor is deliberately lightweight -- no parameters -- so
    /// losing delegates waste nothing; the winner fetches the payload
    /// through the acquire flow. Returns the number of deliveries (zero
    /// simply means the task stays queued until the next rebroadcast).
    pub async fn announce_task(&self, task: &Task) -> usize {
        let descriptor = json!({
            "type": MSG_TYPE_TASK_AVAILABLE,
            "data": {
                "task_id": task.id,
                "task_type": task.task_type,
                "required_capabilities": task.required_capabilities,
            },
        });

        let required = task.required_capabilities_vec();
        let owner = task.delegate_id.clone();
        self.registry
            .broadcast_filtered(
                &task.account_id,
                Message::Text(descriptor.to_string().into()),
                move |conn| {
                    filter::should_deliver(
                        &required,
                        &conn.capabilities,
                        owner.as_deref(),
                        &conn.delegate_id,
                    )
                },
            )
            .await
    }

    /// Push the full payload of an acquired task to its owner.
    ///
    /// Returns `false` when the owner is no longer connected; the task
    /// then sits acquired until its owner reconnects or the reaper
    /// reclaims it.
    pub async fn send_task_payload(&self, task: &Task) -> bool {
        let Some(delegate_id) = task.delegate_id.as_deref() else {
            return false;
        };

        let payload = json!({
            "type": MSG_TYPE_TASK_PAYLOAD,
            "data": {
                "task_id": task.id,
                "task_type": task.task_type,
                "parameters": task.parameters,
                "timeout_ms": task.timeout_ms,
            },
        });

        self.registry
            .send_to(
                &task.account_id,
                delegate_id,
                Message::Text(payload.to_string().into()),
            )
            .await
    }

    /// Push a perpetual-task run descriptor to its assigned delegate.
    pub async fn send_perpetual_assign(
        &self,
        record: &PerpetualTaskRecord,
        run_params: serde_json::Value,
    ) -> bool {
        let Some(delegate_id) = record.assigned_delegate_id.as_deref() else {
            return false;
        };

        let descriptor = json!({
            "type": MSG_TYPE_PERPETUAL_ASSIGN,
            "data": {
                "perpetual_task_id": record.id,
                "task_type": record.task_type,
                "interval_ms": record.interval_ms,
                "params": run_params,
            },
        });

        self.registry
            .send_to(
                &record.account_id,
                delegate_id,
                Message::Text(descriptor.to_string().into()),
            )
            .await
    }

    /// Tell a delegate to stop executing a perpetual task.
    pub async fn send_perpetual_release(
        &self,
        account_id: &str,
        delegate_id: &str,
        perpetual_task_id: Uuid,
    ) -> bool {
        let frame = json!({
            "type": MSG_TYPE_PERPETUAL_RELEASE,
            "data": { "perpetual_task_id": perpetual_task_id },
        });

        self.registry
            .send_to(
                account_id,
                delegate_id,
                Message::Text(frame.to_string().into()),
            )
            .await
    }
}
