//! Perpetual task entity models and DTOs.
//!
//! Perpetual tasks are recurring monitoring assignments: they are never
//! "completed", only assigned, reassigned, paused, or deleted.

use relay_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{PerpetualTaskState, StatusId};

/// A row from the `perpetual_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PerpetualTaskRecord {
    pub id: Uuid,
    pub account_id: String,
    pub task_type: String,
    /// How often the delegate should run the assignment.
    pub interval_ms: i64,
    /// Opaque context supplied by the caller, validated by the type
    /// handler at create time.
    pub client_context: serde_json::Value,
    pub assigned_delegate_id: Option<String>,
    pub last_heartbeat_at: Option<Timestamp>,
    pub state_id: StatusId,
    pub created_at: Timestamp,
    pub last_updated_at: Timestamp,
}

impl PerpetualTaskRecord {
    /// Decode the raw state id, `None` on version skew.
    pub fn state(&self) -> Option<PerpetualTaskState> {
        PerpetualTaskState::from_id(self.state_id)
    }
}

/// DTO for `POST /api/v1/perpetual-tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePerpetualTask {
    pub account_id: String,
    pub task_type: String,
    /// Schedule interval in milliseconds.
    pub interval_ms: i64,
    #[serde(default = "default_context")]
    pub client_context: serde_json::Value,
    /// When `false` (the default), creating a second record with the
    /// same (account, type, context) returns the existing one.
    #[serde(default)]
    pub allow_duplicate: bool,
}

fn default_context() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Query parameters for `GET /api/v1/perpetual-tasks`.
#[derive(Debug, Default, Deserialize)]
pub struct PerpetualTaskListQuery {
    pub account_id: Option<String>,
}
