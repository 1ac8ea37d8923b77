//! Perpetual task lifecycle and assignment-loop tests.

mod common;

use assert_matches::assert_matches;
use common::{drain_frames, frame_types, harness};
use relay_api::error::AppError;
use relay_core::error::CoreError;
use relay_db::models::perpetual_task::CreatePerpetualTask;
use relay_db::models::status::PerpetualTaskState;
use relay_db::store::PerpetualTaskStore;

fn watch_request(account: &str, url: &str) -> CreatePerpetualTask {
    CreatePerpetualTask {
        account_id: account.to_string(),
        task_type: "endpoint_watch".to_string(),
        interval_ms: 10_000,
        client_context: serde_json::json!({"url": url}),
        allow_duplicate: false,
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_requires_known_type_and_valid_context() {
    let h = harness();

    let mut unknown = watch_request("acct-1", "https://example.com");
    unknown.task_type = "quantum_watch".into();
    let err = h.perpetual.create(unknown).await.unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::Validation(_)));

    let bad_context = watch_request("acct-1", "ftp://example.com");
    assert!(h.perpetual.create(bad_context).await.is_err());

    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();
    assert_eq!(record.state_id, PerpetualTaskState::Unassigned.id());
}

#[tokio::test]
async fn duplicate_create_returns_existing_unless_allowed() {
    let h = harness();

    let first = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();

    let suppressed = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();
    assert_eq!(suppressed.id, first.id);

    let mut allowed = watch_request("acct-1", "https://example.com");
    allowed.allow_duplicate = true;
    let twin = h.perpetual.create(allowed).await.unwrap();
    assert_ne!(twin.id, first.id);
}

// ---------------------------------------------------------------------------
// Assignment loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn record_waits_without_fleet_then_assigns_on_connect() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();

    // No connected delegate: cycles leave the record UNASSIGNED without
    // error, indefinitely.
    for _ in 0..3 {
        h.perpetual.assign_cycle().await;
    }
    let waiting = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(waiting.state_id, PerpetualTaskState::Unassigned.id());

    // A delegate connects; the next cycle assigns and pushes the run
    // descriptor built by the type handler.
    let mut rx = h.connect_delegate("acct-1", "delegate-1", &[]).await;
    h.perpetual.assign_cycle().await;

    let assigned = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(assigned.state_id, PerpetualTaskState::Assigned.id());
    assert_eq!(assigned.assigned_delegate_id.as_deref(), Some("delegate-1"));

    let frames = drain_frames(&mut rx);
    assert_eq!(frame_types(&frames), vec!["perpetual_assign"]);
    assert_eq!(frames[0]["data"]["perpetual_task_id"], record.id.to_string());
    assert_eq!(frames[0]["data"]["params"]["expected_status"], 200);
}

#[tokio::test]
async fn assignment_skips_other_accounts_fleet() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();

    let _rx = h.connect_delegate("acct-2", "delegate-9", &[]).await;
    h.perpetual.assign_cycle().await;

    let waiting = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(waiting.state_id, PerpetualTaskState::Unassigned.id());
}

#[tokio::test]
async fn silent_delegate_is_reclaimed_and_reassigned() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();

    let _rx1 = h.connect_delegate("acct-1", "delegate-1", &[]).await;
    h.perpetual.assign_cycle().await;

    // The delegate vanishes and stops heartbeating; its replacement is
    // already connected.
    h.registry.remove("acct-1", "delegate-1").await;
    let mut rx2 = h.connect_delegate("acct-1", "delegate-2", &[]).await;

    // Three missed intervals reclaim the assignment; the same cycle
    // hands it to the healthy delegate.
    h.clock.advance(chrono::Duration::seconds(31));
    h.perpetual.assign_cycle().await;

    let reassigned = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(reassigned.state_id, PerpetualTaskState::Assigned.id());
    assert_eq!(
        reassigned.assigned_delegate_id.as_deref(),
        Some("delegate-2")
    );
    assert!(frame_types(&drain_frames(&mut rx2)).contains(&"perpetual_assign".to_string()));
}

#[tokio::test]
async fn heartbeats_keep_assignment_alive() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();
    let _rx = h.connect_delegate("acct-1", "delegate-1", &[]).await;
    h.perpetual.assign_cycle().await;

    // The delegate keeps reporting inside the staleness window.
    for _ in 0..5 {
        h.clock.advance(chrono::Duration::seconds(20));
        assert!(h
            .perpetual
            .record_heartbeat(record.id, "delegate-1")
            .await
            .unwrap());
        h.perpetual.assign_cycle().await;
    }

    let healthy = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(healthy.state_id, PerpetualTaskState::Assigned.id());
    assert_eq!(healthy.assigned_delegate_id.as_deref(), Some("delegate-1"));
}

#[tokio::test]
async fn assignments_rotate_across_the_fleet() {
    let h = harness();
    let _rx1 = h.connect_delegate("acct-1", "delegate-1", &[]).await;
    let _rx2 = h.connect_delegate("acct-1", "delegate-2", &[]).await;

    for i in 0..6 {
        h.perpetual
            .create(watch_request("acct-1", &format!("https://example.com/{i}")))
            .await
            .unwrap();
    }
    h.perpetual.assign_cycle().await;

    let records = h.perpetual_store.list(Some("acct-1")).await.unwrap();
    let on_one = records
        .iter()
        .filter(|r| r.assigned_delegate_id.as_deref() == Some("delegate-1"))
        .count();
    let on_two = records
        .iter()
        .filter(|r| r.assigned_delegate_id.as_deref() == Some("delegate-2"))
        .count();
    assert_eq!(on_one + on_two, 6);
    assert_eq!(on_one, 3, "round-robin splits the account's records evenly");
    assert_eq!(on_two, 3);
}

// ---------------------------------------------------------------------------
// Pause / resume / reset / delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn paused_record_is_never_assigned_until_resumed() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();
    let _rx = h.connect_delegate("acct-1", "delegate-1", &[]).await;

    h.perpetual.pause(record.id, None).await.unwrap();
    h.perpetual.assign_cycle().await;
    let paused = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(paused.state_id, PerpetualTaskState::Paused.id());

    // Pausing twice conflicts; resuming puts it back in rotation.
    assert!(h.perpetual.pause(record.id, None).await.is_err());
    h.perpetual.resume(record.id, None).await.unwrap();
    h.perpetual.assign_cycle().await;

    let assigned = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(assigned.state_id, PerpetualTaskState::Assigned.id());
}

#[tokio::test]
async fn reset_releases_the_delegate_and_reassigns_next_cycle() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();
    let mut rx = h.connect_delegate("acct-1", "delegate-1", &[]).await;
    h.perpetual.assign_cycle().await;
    drain_frames(&mut rx);

    h.perpetual.reset(record.id, None).await.unwrap();

    // The old owner was told to stop.
    let frames = drain_frames(&mut rx);
    assert!(frame_types(&frames).contains(&"perpetual_release".to_string()));

    let unassigned = h.perpetual_store.get(record.id).await.unwrap().unwrap();
    assert_eq!(unassigned.state_id, PerpetualTaskState::Unassigned.id());
}

#[tokio::test]
async fn account_scope_hides_foreign_records() {
    let h = harness();
    let record = h
        .perpetual
        .create(watch_request("acct-1", "https://example.com"))
        .await
        .unwrap();

    let err = h
        .perpetual
        .get(record.id, Some("acct-2"))
        .await
        .unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::NotFound { .. }));

    let err = h
        .perpetual
        .delete(record.id, Some("acct-2"))
        .await
        .unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::NotFound { .. }));

    // Correctly scoped delete works and the record is gone.
    h.perpetual.delete(record.id, Some("acct-1")).await.unwrap();
    assert!(h.perpetual_store.get(record.id).await.unwrap().is_none());
}
