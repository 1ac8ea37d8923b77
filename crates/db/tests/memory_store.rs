//! Store-level semantics tests against the in-memory implementations.
//!
//! These exercise the conditional-update guards that give the queue its
//! at-most-one-owner and final-transition-wins properties. The Postgres
//! repositories encode the same guards in their WHERE clauses.

use assert_matches::assert_matches;
use relay_core::types::Timestamp;
use relay_db::lock::SweepLock;
use relay_db::memory::{LocalSweepLock, MemoryPerpetualTaskStore, MemoryTaskStore};
use relay_db::models::status::{PerpetualTaskState, TaskLane, TaskStatus};
use relay_db::models::task::TaskStage;
use relay_db::store::{
    AcquireOutcome, AssignOutcome, CancelOutcome, CompleteOutcome, NewPerpetualTask, NewTask,
    PerpetualTaskStore, TaskStore,
};
use uuid::Uuid;

fn new_task(account: &str, created_at: Timestamp) -> NewTask {
    NewTask {
        account_id: account.to_string(),
        app_id: None,
        task_type: "shell_script".to_string(),
        parameters: serde_json::json!({"script": "true"}),
        required_capabilities: vec![],
        lane: TaskLane::Async,
        timeout_ms: 60_000,
        wait_id: Uuid::now_v7(),
        created_at,
        expires_at: created_at + chrono::Duration::hours(1),
    }
}

fn new_perpetual(account: &str, created_at: Timestamp) -> NewPerpetualTask {
    NewPerpetualTask {
        account_id: account.to_string(),
        task_type: "endpoint_watch".to_string(),
        interval_ms: 10_000,
        client_context: serde_json::json!({"url": "https://example.com"}),
        created_at,
    }
}

// ---------------------------------------------------------------------------
// Task lease semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_acquires_yield_exactly_one_owner() {
    let store = std::sync::Arc::new(MemoryTaskStore::new());
    let now = chrono::Utc::now();
    let task = store.submit(new_task("acct-1", now)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = std::sync::Arc::clone(&store);
        let delegate = format!("delegate-{i}");
        handles.push(tokio::spawn(async move {
            store.acquire(task.id, &delegate, now).await.unwrap()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), AcquireOutcome::Acquired(_)) {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one delegate may win the acquire race");
}

#[tokio::test]
async fn second_acquire_loses_silently() {
    let store = MemoryTaskStore::new();
    let now = chrono::Utc::now();
    let task = store.submit(new_task("acct-1", now)).await.unwrap();

    assert_matches!(
        store.acquire(task.id, "d1", now).await.unwrap(),
        AcquireOutcome::Acquired(_)
    );
    assert_matches!(
        store.acquire(task.id, "d2", now).await.unwrap(),
        AcquireOutcome::Lost
    );
}

#[tokio::test]
async fn complete_requires_matching_owner() {
    let store = MemoryTaskStore::new();
    let now = chrono::Utc::now();
    let task = store.submit(new_task("acct-1", now)).await.unwrap();
    store.acquire(task.id, "d1", now).await.unwrap();
    assert!(store.mark_started(task.id, "d1", now).await.unwrap());

    // A delegate that does not own the task loses the completion race.
    assert_matches!(
        store
            .complete(
                task.id,
                "d2",
                TaskStatus::Success,
                Some(serde_json::json!({"ok": true})),
                None,
                now,
            )
            .await
            .unwrap(),
        CompleteOutcome::Lost
    );

    // The owner applies the terminal transition and the result sticks.
    let applied = store
        .complete(
            task.id,
            "d1",
            TaskStatus::Success,
            Some(serde_json::json!({"ok": true})),
            None,
            now,
        )
        .await
        .unwrap();
    let updated = assert_matches!(applied, CompleteOutcome::Applied(t) => t);
    assert_eq!(updated.status_id, TaskStatus::Success.id());
    assert_eq!(updated.result, Some(serde_json::json!({"ok": true})));

    // A terminal transition is final.
    assert_matches!(
        store
            .complete(task.id, "d1", TaskStatus::Error, None, Some("late".into()), now)
            .await
            .unwrap(),
        CompleteOutcome::Lost
    );
}

#[tokio::test]
async fn mark_started_rejects_non_owner() {
    let store = MemoryTaskStore::new();
    let now = chrono::Utc::now();
    let task = store.submit(new_task("acct-1", now)).await.unwrap();
    store.acquire(task.id, "d1", now).await.unwrap();

    assert!(!store.mark_started(task.id, "d2", now).await.unwrap());
    assert!(store.mark_started(task.id, "d1", now).await.unwrap());
}

#[tokio::test]
async fn cancel_reports_stage_and_respects_terminal() {
    let store = MemoryTaskStore::new();
    let now = chrono::Utc::now();

    let queued = store.submit(new_task("acct-1", now)).await.unwrap();
    assert_matches!(
        store.cancel(queued.id, now).await.unwrap(),
        CancelOutcome::Cancelled {
            stage: TaskStage::Queueing
        }
    );

    let acquired = store.submit(new_task("acct-1", now)).await.unwrap();
    store.acquire(acquired.id, "d1", now).await.unwrap();
    assert_matches!(
        store.cancel(acquired.id, now).await.unwrap(),
        CancelOutcome::Cancelled {
            stage: TaskStage::Validating
        }
    );

    let started = store.submit(new_task("acct-1", now)).await.unwrap();
    store.acquire(started.id, "d1", now).await.unwrap();
    store.mark_started(started.id, "d1", now).await.unwrap();
    assert_matches!(
        store.cancel(started.id, now).await.unwrap(),
        CancelOutcome::Cancelled {
            stage: TaskStage::Executing
        }
    );

    // Cancelling again loses: the abort was already terminal.
    assert_matches!(
        store.cancel(started.id, now).await.unwrap(),
        CancelOutcome::AlreadyTerminal
    );
}

// ---------------------------------------------------------------------------
// Reaper scan semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_stuck_owners_only_past_cutoff() {
    let store = MemoryTaskStore::new();
    let start = chrono::Utc::now();

    let stuck = store.submit(new_task("acct-1", start)).await.unwrap();
    store.acquire(stuck.id, "d1", start).await.unwrap();

    let fresh_time = start + chrono::Duration::minutes(4);
    let fresh = store.submit(new_task("acct-1", fresh_time)).await.unwrap();
    store.acquire(fresh.id, "d2", fresh_time).await.unwrap();

    // Cutoff at start + 2min: only the task acquired at `start` is stuck.
    let cutoff = start + chrono::Duration::minutes(2);
    let now = start + chrono::Duration::minutes(5);
    let released = store.release_stuck_owners(cutoff, now).await.unwrap();

    assert_eq!(released.len(), 1);
    assert_eq!(released[0].id, stuck.id);
    assert!(released[0].delegate_id.is_none());

    // The released task can be acquired again by another delegate.
    assert_matches!(
        store.acquire(stuck.id, "d3", now).await.unwrap(),
        AcquireOutcome::Acquired(_)
    );
}

#[tokio::test]
async fn started_timeout_boundary_is_strict() {
    let store = MemoryTaskStore::new();
    let start = chrono::Utc::now();
    let task = store.submit(new_task("acct-1", start)).await.unwrap();
    store.acquire(task.id, "d1", start).await.unwrap();
    store.mark_started(task.id, "d1", start).await.unwrap();

    // Exactly at the budget: not yet eligible.
    let at_budget = start + chrono::Duration::milliseconds(60_000);
    assert!(store.started_timed_out(at_budget).await.unwrap().is_empty());

    // One millisecond past the budget: eligible.
    let past_budget = at_budget + chrono::Duration::milliseconds(1);
    let timed_out = store.started_timed_out(past_budget).await.unwrap();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].id, task.id);
}

#[tokio::test]
async fn queued_expired_and_unowned_scans() {
    let store = MemoryTaskStore::new();
    let start = chrono::Utc::now();

    let first = store.submit(new_task("acct-1", start)).await.unwrap();
    let second = store
        .submit(new_task("acct-1", start + chrono::Duration::seconds(1)))
        .await
        .unwrap();
    let owned = store
        .submit(new_task("acct-1", start + chrono::Duration::seconds(2)))
        .await
        .unwrap();
    store.acquire(owned.id, "d1", start).await.unwrap();

    // Unowned scan is oldest-first and excludes the owned task.
    let unowned = store.unowned_queued(10).await.unwrap();
    assert_eq!(
        unowned.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );

    // Nothing expired inside the ceiling, everything after it.
    assert!(store.queued_expired(start).await.unwrap().is_empty());
    let past_ceiling = start + chrono::Duration::hours(2);
    let expired = store.queued_expired(past_ceiling).await.unwrap();
    assert_eq!(expired.len(), 3);
}

#[tokio::test]
async fn force_fail_ignores_owner_but_not_terminal_state() {
    let store = MemoryTaskStore::new();
    let now = chrono::Utc::now();
    let task = store.submit(new_task("acct-1", now)).await.unwrap();
    store.acquire(task.id, "d1", now).await.unwrap();

    let failed = store
        .force_fail(task.id, "Delegate timed out executing the task", now)
        .await
        .unwrap();
    let row = assert_matches!(failed, CompleteOutcome::Applied(t) => t);
    assert_eq!(row.status_id, TaskStatus::Error.id());
    assert!(row.error_message.as_deref().unwrap().contains("timed out"));

    assert_matches!(
        store.force_fail(task.id, "again", now).await.unwrap(),
        CompleteOutcome::Lost
    );
}

// ---------------------------------------------------------------------------
// Perpetual task semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assign_is_conditional_on_unassigned() {
    let store = MemoryPerpetualTaskStore::new();
    let now = chrono::Utc::now();
    let record = store.create(new_perpetual("acct-1", now)).await.unwrap();
    assert_eq!(record.state_id, PerpetualTaskState::Unassigned.id());

    assert_matches!(
        store.assign(record.id, "d1", now).await.unwrap(),
        AssignOutcome::Assigned(_)
    );
    // A second replica loses the assignment race.
    assert_matches!(
        store.assign(record.id, "d2", now).await.unwrap(),
        AssignOutcome::Lost
    );
}

#[tokio::test]
async fn heartbeat_requires_assigned_owner() {
    let store = MemoryPerpetualTaskStore::new();
    let now = chrono::Utc::now();
    let record = store.create(new_perpetual("acct-1", now)).await.unwrap();

    assert!(!store.heartbeat(record.id, "d1", now).await.unwrap());

    store.assign(record.id, "d1", now).await.unwrap();
    assert!(!store.heartbeat(record.id, "d2", now).await.unwrap());
    assert!(store.heartbeat(record.id, "d1", now).await.unwrap());
}

#[tokio::test]
async fn stale_assignment_detection_uses_interval_multiple() {
    let store = MemoryPerpetualTaskStore::new();
    let start = chrono::Utc::now();
    let record = store.create(new_perpetual("acct-1", start)).await.unwrap();
    store.assign(record.id, "d1", start).await.unwrap();

    // interval 10s, multiple 3 -> stale strictly after 30s of silence.
    let at_limit = start + chrono::Duration::seconds(30);
    assert!(store.stale_assigned(3, at_limit).await.unwrap().is_empty());

    let past_limit = start + chrono::Duration::seconds(31);
    let stale = store.stale_assigned(3, past_limit).await.unwrap();
    assert_eq!(stale.len(), 1);

    // A heartbeat resets the window.
    store.heartbeat(record.id, "d1", past_limit).await.unwrap();
    assert!(store
        .stale_assigned(3, past_limit + chrono::Duration::seconds(5))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn pause_resume_reset_lifecycle() {
    let store = MemoryPerpetualTaskStore::new();
    let now = chrono::Utc::now();
    let record = store.create(new_perpetual("acct-1", now)).await.unwrap();
    store.assign(record.id, "d1", now).await.unwrap();

    assert!(store.pause(record.id, now).await.unwrap());
    let paused = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(paused.state_id, PerpetualTaskState::Paused.id());
    assert!(paused.assigned_delegate_id.is_none());

    // Paused records are not assignable and cannot be paused again.
    assert_matches!(
        store.assign(record.id, "d2", now).await.unwrap(),
        AssignOutcome::Lost
    );
    assert!(!store.pause(record.id, now).await.unwrap());

    assert!(store.resume(record.id, now).await.unwrap());
    store.assign(record.id, "d2", now).await.unwrap();

    assert!(store.reset(record.id, now).await.unwrap());
    let reset = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(reset.state_id, PerpetualTaskState::Unassigned.id());
    assert!(reset.assigned_delegate_id.is_none());
}

#[tokio::test]
async fn duplicate_detection_matches_context() {
    let store = MemoryPerpetualTaskStore::new();
    let now = chrono::Utc::now();
    let record = store.create(new_perpetual("acct-1", now)).await.unwrap();

    let dup = store
        .find_duplicate(
            "acct-1",
            "endpoint_watch",
            &serde_json::json!({"url": "https://example.com"}),
        )
        .await
        .unwrap();
    assert_eq!(dup.map(|r| r.id), Some(record.id));

    let other = store
        .find_duplicate(
            "acct-1",
            "endpoint_watch",
            &serde_json::json!({"url": "https://other.example.com"}),
        )
        .await
        .unwrap();
    assert!(other.is_none());
}

// ---------------------------------------------------------------------------
// Sweep lock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_lock_is_exclusive_until_released() {
    let lock = LocalSweepLock::new();

    let guard = lock.try_acquire().await.unwrap().expect("first acquire");
    assert!(
        lock.try_acquire().await.unwrap().is_none(),
        "second acquire must be refused while held"
    );

    guard.release().await;
    assert!(lock.try_acquire().await.unwrap().is_some());
}
