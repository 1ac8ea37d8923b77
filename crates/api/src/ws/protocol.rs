//! Inbound delegate stream message types.
//!
//! Delegates post JSON frames with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`DelegateMessage`] enum; unknown kinds fail
//! deserialization and are logged, never fatal.

use serde::Deserialize;
use uuid::Uuid;

/// All known inbound delegate messages.
///
/// Deserialized via the internally-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DelegateMessage {
    /// Self-registration: advertises (or refreshes) capability tags.
    Register(RegisterData),

    /// Explicit liveness signal (any frame also counts as liveness).
    Heartbeat,

    /// Attempt to take ownership of an announced task.
    TaskAcquire(TaskAcquireData),

    /// The delegate has begun executing an acquired task.
    TaskStarted(TaskStartedData),

    /// Terminal result for a task the delegate owns.
    TaskResult(TaskResultData),

    /// Liveness signal for an assigned perpetual task.
    PerpetualHeartbeat(PerpetualHeartbeatData),
}

/// Payload for `register` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterData {
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Payload for `task_acquire` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskAcquireData {
    pub task_id: Uuid,
}

/// Payload for `task_started` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStartedData {
    pub task_id: Uuid,
}

/// Terminal result codes a delegate may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    Error,
    Aborted,
}

/// Payload for `task_result` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskResultData {
    pub task_id: Uuid,
    pub code: ResultCode,
    /// Opaque result payload on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Human-readable cause on error.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Payload for `perpetual_heartbeat` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct PerpetualHeartbeatData {
    pub perpetual_task_id: Uuid,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register() {
        let msg: DelegateMessage = serde_json::from_str(
            r#"{"type": "register", "data": {"capabilities": ["linux", "docker"]}}"#,
        )
        .unwrap();
        match msg {
            DelegateMessage::Register(data) => {
                assert_eq!(data.capabilities, vec!["linux", "docker"]);
            }
            other => panic!("expected register, got {other:?}"),
        }
    }

    #[test]
    fn parses_bare_heartbeat() {
        let msg: DelegateMessage = serde_json::from_str(r#"{"type": "heartbeat"}"#).unwrap();
        assert!(matches!(msg, DelegateMessage::Heartbeat));
    }

    #[test]
    fn parses_task_result_with_error() {
        let id = Uuid::now_v7();
        let raw = format!(
            r#"{{"type": "task_result",
                 "data": {{"task_id": "{id}", "code": "error",
                           "error_message": "exit status 1"}}}}"#
        );
        let msg: DelegateMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            DelegateMessage::TaskResult(data) => {
                assert_eq!(data.task_id, id);
                assert_eq!(data.code, ResultCode::Error);
                assert_eq!(data.error_message.as_deref(), Some("exit status 1"));
                assert!(data.result.is_none());
            }
            other => panic!("expected task_result, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<DelegateMessage, _> =
            serde_json::from_str(r#"{"type": "telemetry", "data": {}}"#);
        assert!(result.is_err());
    }
}
