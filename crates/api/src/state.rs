use std::sync::Arc;

use relay_core::clock::Clock;
use relay_db::store::TaskStore;
use relay_events::EventBus;

use crate::config::ServerConfig;
use crate::engine::{PerpetualTaskService, TaskDispatcher};
use crate::ws::{DelegateRegistry, TaskBroadcaster};

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Everything is constructed in `main` and injected -- no process-wide
/// singletons. Cheaply cloneable (inner data is behind `Arc` or is
/// already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (health checks).
    pub pool: relay_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Injected time source.
    pub clock: Arc<dyn Clock>,
    /// Connected-delegate registry for this replica.
    pub registry: Arc<DelegateRegistry>,
    /// Per-account broadcast fan-out.
    pub broadcaster: TaskBroadcaster,
    /// In-process dispatch event bus.
    pub bus: Arc<EventBus>,
    /// Durable task store (reads on the caller API).
    pub task_store: Arc<dyn TaskStore>,
    /// One-shot task lifecycle orchestration.
    pub dispatcher: Arc<TaskDispatcher>,
    /// Perpetual task lifecycle + assignment service.
    pub perpetual: Arc<PerpetualTaskService>,
}
