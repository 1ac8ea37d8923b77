//! Terminal outcome payload delivered to waiting callers.

use serde::{Deserialize, Serialize};

/// The result a caller observes for a finished task.
///
/// Carried through the wait/notify registry and serialized into the
/// synchronous submission response. A delegate that times out or is
/// reaped produces `Error` with a human-readable cause; cancellation
/// produces `Aborted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The delegate reported success with an opaque result payload.
    Success { result: serde_json::Value },
    /// The delegate reported failure, or the reaper forced one.
    Error { message: String },
    /// The task was cancelled before a delegate finished it.
    Aborted,
}

impl TaskOutcome {
    /// Convenience constructor for error outcomes.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
