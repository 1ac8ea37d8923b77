//! Task entity models and DTOs for the delegate dispatch engine.

use relay_core::outcome::TaskOutcome;
use relay_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{StatusId, TaskStatus};

/// A row from the `tasks` table.
///
/// `delegate_id` is never serialized: pre-completion ownership is not
/// part of the caller-facing contract, and after completion only the
/// outcome matters.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub account_id: String,
    pub app_id: Option<String>,
    pub task_type: String,
    pub parameters: serde_json::Value,
    /// JSONB array of capability tags the executing delegate must have.
    pub required_capabilities: serde_json::Value,
    pub lane_id: StatusId,
    pub status_id: StatusId,
    #[serde(skip_serializing)]
    pub delegate_id: Option<String>,
    /// Correlation key linking this task to a suspended caller.
    pub wait_id: Uuid,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Execution time budget, fixed at submission. Enforced only by the
    /// reaper, never by the delegate.
    pub timeout_ms: i64,
    pub created_at: Timestamp,
    pub last_updated_at: Timestamp,
    /// Queued-ceiling deadline: a task still queued past this instant is
    /// force-failed regardless of `timeout_ms`.
    pub expires_at: Timestamp,
}

impl Task {
    /// Decode the JSONB capability array into a string list.
    ///
    /// Malformed entries are skipped rather than failing the whole task;
    /// the filter then simply sees fewer required tags.
    pub fn required_capabilities_vec(&self) -> Vec<String> {
        self.required_capabilities
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        TaskStatus::from_id(self.status_id).is_some_and(TaskStatus::is_terminal)
    }

    /// Coarse progress stage derived from (status, owner).
    pub fn stage(&self) -> TaskStage {
        match TaskStatus::from_id(self.status_id) {
            Some(TaskStatus::Queued) if self.delegate_id.is_none() => TaskStage::Queueing,
            Some(TaskStatus::Queued) => TaskStage::Validating,
            Some(TaskStatus::Started) => TaskStage::Executing,
            _ => TaskStage::Finished,
        }
    }

    /// The outcome delivered to a waiting caller, `None` while the task
    /// is still in flight.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match TaskStatus::from_id(self.status_id)? {
            TaskStatus::Success => Some(TaskOutcome::Success {
                result: self.result.clone().unwrap_or(serde_json::Value::Null),
            }),
            TaskStatus::Error => Some(TaskOutcome::error(
                self.error_message
                    .clone()
                    .unwrap_or_else(|| "Task failed without a reported cause".to_string()),
            )),
            TaskStatus::Aborted => Some(TaskOutcome::Aborted),
            _ => None,
        }
    }
}

/// Caller-visible progress stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Queueing,
    Validating,
    Executing,
    Finished,
}

impl TaskStage {
    /// Stable string form used in events and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queueing => "queueing",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Finished => "finished",
        }
    }
}

/// DTO for submitting a new task via `POST /api/v1/tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTask {
    pub account_id: String,
    pub app_id: Option<String>,
    pub task_type: String,
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Execution budget in milliseconds. Defaults to the configured
    /// per-task timeout when omitted.
    pub timeout_ms: Option<i64>,
}

fn default_parameters() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Query parameters for `GET /api/v1/tasks`.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    /// Filter by account.
    pub account_id: Option<String>,
    /// Filter by status ID (e.g. 1 = queued, 4 = error).
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(status: TaskStatus, delegate: Option<&str>) -> Task {
        let now = chrono::Utc::now();
        Task {
            id: Uuid::now_v7(),
            account_id: "acct-1".into(),
            app_id: None,
            task_type: "script".into(),
            parameters: serde_json::json!({}),
            required_capabilities: serde_json::json!(["linux"]),
            lane_id: super::super::status::TaskLane::Async.id(),
            status_id: status.id(),
            delegate_id: delegate.map(str::to_string),
            wait_id: Uuid::now_v7(),
            result: None,
            error_message: None,
            timeout_ms: 60_000,
            created_at: now,
            last_updated_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn stage_derivation() {
        assert_eq!(task_with(TaskStatus::Queued, None).stage(), TaskStage::Queueing);
        assert_eq!(
            task_with(TaskStatus::Queued, Some("d1")).stage(),
            TaskStage::Validating
        );
        assert_eq!(
            task_with(TaskStatus::Started, Some("d1")).stage(),
            TaskStage::Executing
        );
        assert_eq!(
            task_with(TaskStatus::Success, Some("d1")).stage(),
            TaskStage::Finished
        );
    }

    #[test]
    fn capability_decoding_skips_malformed_entries() {
        let mut task = task_with(TaskStatus::Queued, None);
        task.required_capabilities = serde_json::json!(["linux", 42, "docker"]);
        assert_eq!(task.required_capabilities_vec(), vec!["linux", "docker"]);

        task.required_capabilities = serde_json::json!("not-an-array");
        assert!(task.required_capabilities_vec().is_empty());
    }

    #[test]
    fn outcome_mapping() {
        let mut task = task_with(TaskStatus::Success, Some("d1"));
        task.result = Some(serde_json::json!({"exit": 0}));
        assert_eq!(
            task.outcome(),
            Some(TaskOutcome::Success {
                result: serde_json::json!({"exit": 0})
            })
        );

        let mut failed = task_with(TaskStatus::Error, Some("d1"));
        failed.error_message = Some("boom".into());
        assert_eq!(failed.outcome(), Some(TaskOutcome::error("boom")));

        assert_eq!(task_with(TaskStatus::Started, Some("d1")).outcome(), None);
    }

    #[test]
    fn delegate_id_not_serialized() {
        let task = task_with(TaskStatus::Queued, Some("d1"));
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("delegate_id").is_none());
    }
}
