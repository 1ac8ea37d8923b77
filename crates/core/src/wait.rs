//! Wait/notify correlation between task submission and task completion.
//!
//! A caller that needs the outcome of an asynchronous completion
//! registers a [`WaitHandle`] under an opaque correlation id. Whichever
//! code path later observes the terminal result calls
//! [`WaitRegistry::notify`], which resumes the caller exactly once.
//!
//! The contract is idempotent and tolerant of at-least-once delivery:
//! notifying an unknown or already-consumed id is a no-op, never an
//! error. A periodic [`WaitRegistry::purge_older_than`] sweep bounds
//! memory growth from notifications that never arrive.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::outcome::TaskOutcome;
use crate::types::Timestamp;

/// A registered wait instance: creation time plus the continuation that
/// resumes the caller.
struct WaitInstance {
    created_at: Timestamp,
    tx: oneshot::Sender<TaskOutcome>,
}

/// Why a wait ended without an outcome.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// No notify arrived within the caller's bound.
    #[error("timed out after {0:?} waiting for a task result")]
    TimedOut(Duration),

    /// The wait instance was removed (age sweep or replacement) before a
    /// result arrived.
    #[error("wait instance was discarded before a result arrived")]
    Discarded,
}

/// The receiving half handed to a waiting caller.
pub struct WaitHandle {
    rx: oneshot::Receiver<TaskOutcome>,
}

impl WaitHandle {
    /// Block until notify fires or `timeout` elapses.
    ///
    /// Never waits indefinitely and never busy-polls; this is a plain
    /// suspension on the underlying oneshot channel.
    pub async fn wait(self, timeout: Duration) -> Result<TaskOutcome, WaitError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(WaitError::Discarded),
            Err(_) => Err(WaitError::TimedOut(timeout)),
        }
    }
}

/// Correlates opaque wait ids with suspended callers.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc`
/// and shared across the application. Tests construct fresh instances.
pub struct WaitRegistry {
    waits: RwLock<HashMap<Uuid, WaitInstance>>,
}

impl WaitRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            waits: RwLock::new(HashMap::new()),
        }
    }

    /// Register a wait instance and return the caller's handle.
    ///
    /// Registering the same id twice replaces the previous instance; the
    /// earlier handle resolves to [`WaitError::Discarded`].
    pub async fn register(&self, wait_id: Uuid, now: Timestamp) -> WaitHandle {
        let (tx, rx) = oneshot::channel();
        self.waits.write().await.insert(
            wait_id,
            WaitInstance {
                created_at: now,
                tx,
            },
        );
        WaitHandle { rx }
    }

    /// Resume the caller registered under `wait_id`, if any.
    ///
    /// Returns `true` when a wait instance existed. An unknown or
    /// already-consumed id returns `false`; callers treat that as a
    /// tolerated duplicate, not a failure. The instance is removed
    /// before resuming, so a second notify can never double-resume.
    pub async fn notify(&self, wait_id: Uuid, outcome: TaskOutcome) -> bool {
        let instance = self.waits.write().await.remove(&wait_id);
        match instance {
            Some(instance) => {
                // A send error only means the waiter already gave up
                // (timeout); the outcome is simply dropped.
                let _ = instance.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove every instance older than `max_age`.
    ///
    /// Returns the number of instances removed. Their handles resolve to
    /// [`WaitError::Discarded`].
    pub async fn purge_older_than(&self, max_age: chrono::Duration, now: Timestamp) -> usize {
        let mut waits = self.waits.write().await;
        let before = waits.len();
        waits.retain(|_, instance| now - instance.created_at <= max_age);
        before - waits.len()
    }

    /// Number of currently registered wait instances.
    pub async fn pending_count(&self) -> usize {
        self.waits.read().await.len()
    }
}

impl Default for WaitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
