//! Shared test-bed: the full dispatch engine over in-memory stores and
//! a manual clock, so every lifecycle property runs without a database.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use std::sync::Arc;

use axum::extract::ws::Message;
use relay_api::config::DispatchConfig;
use relay_api::engine::handlers::builtin_handlers;
use relay_api::engine::{PerpetualTaskService, SyncTaskCache, TaskDispatcher, TaskReaper};
use relay_api::ws::{DelegateRegistry, TaskBroadcaster};
use relay_core::clock::{Clock, ManualClock};
use relay_core::wait::WaitRegistry;
use relay_db::memory::{LocalSweepLock, MemoryPerpetualTaskStore, MemoryTaskStore};
use relay_db::models::task::SubmitTask;
use relay_db::store::{PerpetualTaskStore, TaskStore};
use relay_events::EventBus;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct EngineHarness {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<DelegateRegistry>,
    pub broadcaster: TaskBroadcaster,
    pub bus: Arc<EventBus>,
    pub waits: Arc<WaitRegistry>,
    pub sync_cache: Arc<SyncTaskCache>,
    pub task_store: Arc<MemoryTaskStore>,
    pub perpetual_store: Arc<MemoryPerpetualTaskStore>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub perpetual: Arc<PerpetualTaskService>,
    pub reaper: TaskReaper,
    pub sweep_lock: LocalSweepLock,
}

/// Build a fresh engine over in-memory collaborators.
pub fn harness() -> EngineHarness {
    let config = DispatchConfig::for_tests();
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let clock_dyn: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;

    let registry = Arc::new(DelegateRegistry::new());
    let broadcaster = TaskBroadcaster::new(Arc::clone(&registry));
    let bus = Arc::new(EventBus::default());
    let waits = Arc::new(WaitRegistry::new());
    let sync_cache = Arc::new(SyncTaskCache::new());

    let task_store = Arc::new(MemoryTaskStore::new());
    let task_store_dyn: Arc<dyn TaskStore> = Arc::clone(&task_store) as Arc<dyn TaskStore>;
    let perpetual_store = Arc::new(MemoryPerpetualTaskStore::new());
    let perpetual_store_dyn: Arc<dyn PerpetualTaskStore> =
        Arc::clone(&perpetual_store) as Arc<dyn PerpetualTaskStore>;

    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::clone(&task_store_dyn),
        Arc::clone(&waits),
        Arc::clone(&sync_cache),
        broadcaster.clone(),
        Arc::clone(&bus),
        Arc::clone(&clock_dyn),
        config.clone(),
    ));

    let perpetual = Arc::new(PerpetualTaskService::new(
        perpetual_store_dyn,
        Arc::new(builtin_handlers()),
        Arc::clone(&registry),
        broadcaster.clone(),
        Arc::clone(&bus),
        Arc::clone(&clock_dyn),
        config.clone(),
    ));

    let sweep_lock = LocalSweepLock::new();
    let reaper = TaskReaper::new(
        task_store_dyn,
        Arc::clone(&waits),
        Arc::clone(&sync_cache),
        broadcaster.clone(),
        Arc::new(sweep_lock.clone()),
        Arc::clone(&bus),
        clock_dyn,
        config,
    );

    EngineHarness {
        clock,
        registry,
        broadcaster,
        bus,
        waits,
        sync_cache,
        task_store,
        perpetual_store,
        dispatcher,
        perpetual,
        reaper,
        sweep_lock,
    }
}

impl EngineHarness {
    /// Connect a fake delegate: registry slot + advertised capabilities.
    /// Returns the receiver for frames pushed to the delegate.
    pub async fn connect_delegate(
        &self,
        account_id: &str,
        delegate_id: &str,
        capabilities: &[&str],
    ) -> UnboundedReceiver<Message> {
        let rx = self
            .registry
            .add(account_id, delegate_id, self.clock.now())
            .await;
        self.registry
            .set_capabilities(
                account_id,
                delegate_id,
                capabilities.iter().map(|c| c.to_string()).collect(),
            )
            .await;
        rx
    }
}

/// A plain async-lane submission for `account`.
pub fn submission(account: &str) -> SubmitTask {
    SubmitTask {
        account_id: account.to_string(),
        app_id: None,
        task_type: "shell_script".to_string(),
        parameters: serde_json::json!({"script": "true"}),
        required_capabilities: vec![],
        timeout_ms: None,
    }
}

/// Drain every frame currently buffered for a delegate, parsed as JSON.
pub fn drain_frames(rx: &mut UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            frames.push(serde_json::from_str(text.as_str()).expect("delegate frame is JSON"));
        }
    }
    frames
}

/// Frame types in the buffered order.
pub fn frame_types(frames: &[serde_json::Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["type"].as_str().unwrap_or_default().to_string())
        .collect()
}
