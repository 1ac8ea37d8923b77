//! End-to-end lifecycle tests for the one-shot dispatch engine, driven
//! through `TaskDispatcher` exactly as the HTTP and WebSocket layers
//! drive it.

mod common;

use assert_matches::assert_matches;
use common::{drain_frames, frame_types, harness, submission};
use relay_api::error::AppError;
use relay_api::ws::protocol::{ResultCode, TaskResultData};
use relay_core::clock::Clock;
use relay_core::error::CoreError;
use relay_core::outcome::TaskOutcome;
use relay_db::models::status::TaskStatus;
use relay_db::models::task::TaskStage;
use relay_db::store::TaskStore;

#[tokio::test]
async fn round_trip_submit_acquire_complete() {
    let h = harness();
    let mut rx = h.connect_delegate("acct-1", "delegate-1", &["linux"]).await;

    let task = h.dispatcher.submit(submission("acct-1")).await.unwrap();
    assert_eq!(task.stage(), TaskStage::Queueing);

    // The connected delegate saw the announcement.
    let frames = drain_frames(&mut rx);
    assert_eq!(frame_types(&frames), vec!["task_available"]);
    assert_eq!(frames[0]["data"]["task_id"], task.id.to_string());

    // Acquire wins and the payload comes back for the winner.
    let payload = h
        .dispatcher
        .handle_acquire(task.id, "delegate-1")
        .await
        .unwrap()
        .expect("first acquire wins");
    assert_eq!(payload.stage(), TaskStage::Validating);

    assert!(h
        .dispatcher
        .handle_started(task.id, "delegate-1")
        .await
        .unwrap());
    let started = h.task_store.get(task.id).await.unwrap().unwrap();
    assert_eq!(started.stage(), TaskStage::Executing);

    // Terminal result: stored verbatim, stage becomes finished.
    let result = serde_json::json!({"exit_code": 0, "stdout": "done"});
    let applied = h
        .dispatcher
        .handle_result(
            "delegate-1",
            &TaskResultData {
                task_id: task.id,
                code: ResultCode::Success,
                result: Some(result.clone()),
                error_message: None,
            },
        )
        .await
        .unwrap();
    assert!(applied);

    let finished = h.task_store.get(task.id).await.unwrap().unwrap();
    assert_eq!(finished.status_id, TaskStatus::Success.id());
    assert_eq!(finished.stage(), TaskStage::Finished);
    assert_eq!(finished.result, Some(result));
}

#[tokio::test]
async fn concurrent_acquires_one_winner() {
    let h = harness();
    let task = h.dispatcher.submit(submission("acct-1")).await.unwrap();

    let first = h.dispatcher.handle_acquire(task.id, "delegate-1");
    let second = h.dispatcher.handle_acquire(task.id, "delegate-2");
    let (first, second) = tokio::join!(first, second);

    let wins = [first.unwrap(), second.unwrap()]
        .iter()
        .filter(|outcome| outcome.is_some())
        .count();
    assert_eq!(wins, 1, "exactly one delegate may own the task");
}

#[tokio::test]
async fn stale_result_from_non_owner_is_discarded() {
    let h = harness();
    let task = h.dispatcher.submit(submission("acct-1")).await.unwrap();
    h.dispatcher
        .handle_acquire(task.id, "delegate-1")
        .await
        .unwrap()
        .expect("acquire");

    let applied = h
        .dispatcher
        .handle_result(
            "delegate-2",
            &TaskResultData {
                task_id: task.id,
                code: ResultCode::Success,
                result: None,
                error_message: None,
            },
        )
        .await
        .unwrap();

    assert!(!applied, "a non-owner's result must be discarded");
    let stored = h.task_store.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status_id, TaskStatus::Queued.id());
}

// ---------------------------------------------------------------------------
// Synchronous lane
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_submission_resumes_on_completion() {
    let h = harness();
    let _rx = h.connect_delegate("acct-1", "delegate-1", &[]).await;

    // A stand-in delegate: wait for the task to appear, acquire, finish.
    let dispatcher = std::sync::Arc::clone(&h.dispatcher);
    let store = std::sync::Arc::clone(&h.task_store);
    let completer = tokio::spawn(async move {
        loop {
            let queued = store.unowned_queued(1).await.unwrap();
            if let Some(task) = queued.first() {
                dispatcher
                    .handle_acquire(task.id, "delegate-1")
                    .await
                    .unwrap()
                    .expect("acquire");
                dispatcher
                    .handle_result(
                        "delegate-1",
                        &TaskResultData {
                            task_id: task.id,
                            code: ResultCode::Success,
                            result: Some(serde_json::json!({"ok": true})),
                            error_message: None,
                        },
                    )
                    .await
                    .unwrap();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let (task, outcome) = h
        .dispatcher
        .submit_and_wait(submission("acct-1"))
        .await
        .unwrap();
    completer.await.unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Success {
            result: serde_json::json!({"ok": true})
        }
    );
    // Claimed sync entries leave the cache on acquire.
    assert!(h.sync_cache.is_empty().await);
    let stored = h.task_store.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status_id, TaskStatus::Success.id());
}

#[tokio::test]
async fn sync_submission_times_out_explicitly() {
    let h = harness();

    let mut input = submission("acct-1");
    input.timeout_ms = Some(50);

    let err = h.dispatcher.submit_and_wait(input).await.unwrap_err();
    assert_matches!(err, AppError::WaitTimeout(_));

    // The queue entry survives for the reaper; only the caller stopped
    // waiting.
    let queued = h.task_store.unowned_queued(10).await.unwrap();
    assert_eq!(queued.len(), 1);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_before_completion_aborts_and_notifies_once() {
    let h = harness();
    let task = h.dispatcher.submit(submission("acct-1")).await.unwrap();
    h.dispatcher
        .handle_acquire(task.id, "delegate-1")
        .await
        .unwrap()
        .expect("acquire");

    let handle = h.waits.register(task.wait_id, h.clock.now()).await;

    let stage = h.dispatcher.cancel(task.id).await.unwrap();
    assert_eq!(stage, TaskStage::Validating);

    // The late result from the delegate loses and changes nothing.
    let applied = h
        .dispatcher
        .handle_result(
            "delegate-1",
            &TaskResultData {
                task_id: task.id,
                code: ResultCode::Success,
                result: Some(serde_json::json!({"ok": true})),
                error_message: None,
            },
        )
        .await
        .unwrap();
    assert!(!applied);

    let stored = h.task_store.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status_id, TaskStatus::Aborted.id());

    // Exactly one notify reached the waiter: the abort.
    let outcome = handle
        .wait(std::time::Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(outcome, TaskOutcome::Aborted);
}

#[tokio::test]
async fn cancel_after_completion_conflicts_and_keeps_result() {
    let h = harness();
    let task = h.dispatcher.submit(submission("acct-1")).await.unwrap();
    h.dispatcher
        .handle_acquire(task.id, "delegate-1")
        .await
        .unwrap()
        .expect("acquire");

    let handle = h.waits.register(task.wait_id, h.clock.now()).await;

    h.dispatcher
        .handle_result(
            "delegate-1",
            &TaskResultData {
                task_id: task.id,
                code: ResultCode::Success,
                result: Some(serde_json::json!({"ok": true})),
                error_message: None,
            },
        )
        .await
        .unwrap();

    let err = h.dispatcher.cancel(task.id).await.unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::Conflict(_)));

    let stored = h.task_store.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status_id, TaskStatus::Success.id());

    // The single notify carried the completion, not the abort.
    let outcome = handle
        .wait(std::time::Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TaskOutcome::Success {
            result: serde_json::json!({"ok": true})
        }
    );
}

#[tokio::test]
async fn cancel_unknown_task_is_not_found() {
    let h = harness();
    let err = h.dispatcher.cancel(uuid::Uuid::now_v7()).await.unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// Validation and filtering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_validation_rejects_bad_input() {
    let h = harness();

    let mut empty_type = submission("acct-1");
    empty_type.task_type = String::new();
    assert!(h.dispatcher.submit(empty_type).await.is_err());

    let mut bad_account = submission("acct 1");
    bad_account.task_type = "shell_script".into();
    assert!(h.dispatcher.submit(bad_account).await.is_err());

    let mut bad_timeout = submission("acct-1");
    bad_timeout.timeout_ms = Some(0);
    assert!(h.dispatcher.submit(bad_timeout).await.is_err());
}

#[tokio::test]
async fn announcement_respects_capability_filter() {
    let h = harness();
    let mut capable = h.connect_delegate("acct-1", "delegate-1", &["linux"]).await;
    let mut incapable = h.connect_delegate("acct-1", "delegate-2", &[]).await;

    let mut input = submission("acct-1");
    input.required_capabilities = vec!["linux".into()];
    h.dispatcher.submit(input).await.unwrap();

    assert_eq!(drain_frames(&mut capable).len(), 1);
    assert!(drain_frames(&mut incapable).is_empty());
}
