//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`DispatchEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the
//! application; the progress-stream endpoint subscribes per request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DispatchEvent
// ---------------------------------------------------------------------------

/// A dispatch lifecycle event.
///
/// Constructed via [`DispatchEvent::new`] and enriched with the builder
/// methods [`for_account`](DispatchEvent::for_account),
/// [`for_task`](DispatchEvent::for_task),
/// [`for_perpetual_task`](DispatchEvent::for_perpetual_task), and
/// [`with_payload`](DispatchEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// Dot-separated event name, e.g. `"task.finished"`.
    pub event_type: String,

    /// Account whose fleet the event concerns, when applicable.
    pub account_id: Option<String>,

    /// One-shot task the event concerns, when applicable.
    pub task_id: Option<Uuid>,

    /// Perpetual task the event concerns, when applicable.
    pub perpetual_task_id: Option<Uuid>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl DispatchEvent {
    /// Create a new event with only the required `event_type`.
    ///
    /// All optional fields default to `None` / empty object.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            account_id: None,
            task_id: None,
            perpetual_task_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the account the event concerns.
    pub fn for_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Attach the task the event concerns.
    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Attach the perpetual task the event concerns.
    pub fn for_perpetual_task(mut self, perpetual_task_id: Uuid) -> Self {
        self.perpetual_task_id = Some(perpetual_task_id);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`DispatchEvent`].
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are
    /// dropped and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// durable truth lives in the task store, not on this bus.
    pub fn publish(&self, event: DispatchEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
