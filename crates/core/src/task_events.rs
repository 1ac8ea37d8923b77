//! Wire message-type and event-type constants for the dispatch engine.
//!
//! The `MSG_TYPE_*` constants tag outbound WebSocket frames pushed to
//! delegates; the `EVENT_*` constants name `DispatchEvent`s published on
//! the in-process bus (consumed by the progress-stream endpoint).

// ---------------------------------------------------------------------------
// Outbound delegate stream frames
// ---------------------------------------------------------------------------

/// Acknowledges a delegate's self-registration.
pub const MSG_TYPE_REGISTERED: &str = "registered";

/// Announces a queued task a delegate may try to acquire.
pub const MSG_TYPE_TASK_AVAILABLE: &str = "task_available";

/// Full task payload, sent only to the delegate that won the acquire.
pub const MSG_TYPE_TASK_PAYLOAD: &str = "task_payload";

/// Assigns a perpetual task run descriptor to a delegate.
pub const MSG_TYPE_PERPETUAL_ASSIGN: &str = "perpetual_assign";

/// Tells a delegate to stop executing a perpetual task.
pub const MSG_TYPE_PERPETUAL_RELEASE: &str = "perpetual_release";

// ---------------------------------------------------------------------------
// Bus events
// ---------------------------------------------------------------------------

/// A task was persisted in the queue.
pub const EVENT_TASK_SUBMITTED: &str = "task.submitted";

/// A task changed progress stage (queueing/validating/executing).
pub const EVENT_TASK_PROGRESS: &str = "task.progress";

/// A task reached a terminal status.
pub const EVENT_TASK_FINISHED: &str = "task.finished";

/// A delegate stream connected.
pub const EVENT_DELEGATE_CONNECTED: &str = "delegate.connected";

/// A delegate stream disconnected.
pub const EVENT_DELEGATE_DISCONNECTED: &str = "delegate.disconnected";

/// A perpetual task was assigned to a delegate.
pub const EVENT_PERPETUAL_ASSIGNED: &str = "perpetual.assigned";

/// A perpetual task was released back to the unassigned pool.
pub const EVENT_PERPETUAL_RELEASED: &str = "perpetual.released";
