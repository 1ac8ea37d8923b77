//! Handlers for the `/tasks` resource.
//!
//! Submission is fire-and-forget on the async lane and blocking on the
//! sync lane; progress exposes coarse stages only (pre-completion
//! ownership is not part of the caller contract).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use relay_core::error::CoreError;
use relay_core::task_events::{EVENT_TASK_FINISHED, EVENT_TASK_PROGRESS};
use relay_db::models::task::{SubmitTask, TaskListQuery};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Submit a task on the async lane. Returns 201 immediately; the caller
/// follows progress via the progress endpoints or the outcome via
/// `GET /tasks/{id}`.
pub async fn submit_task(
    State(state): State<AppState>,
    Json(input): Json<SubmitTask>,
) -> AppResult<impl IntoResponse> {
    let task = state.dispatcher.submit(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: task })))
}

/// POST /api/v1/tasks/sync
///
/// Submit a task on the sync lane and block until a delegate reports a
/// terminal outcome or the task's execution budget elapses (504).
pub async fn submit_task_sync(
    State(state): State<AppState>,
    Json(input): Json<SubmitTask>,
) -> AppResult<impl IntoResponse> {
    let (task, outcome) = state.dispatcher.submit_and_wait(input).await?;
    Ok(Json(DataResponse {
        data: serde_json::json!({
            "task_id": task.id,
            "outcome": outcome,
        }),
    }))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// List tasks with optional account / status filters and pagination.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<impl IntoResponse> {
    let tasks = state.task_store.list(&params).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let task = state
        .task_store
        .get(task_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Task",
            id: task_id.to_string(),
        })?;
    Ok(Json(DataResponse { data: task }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/cancel
///
/// Cancel a queued or started task. Returns the stage the cancellation
/// caught it at; 409 if a terminal transition won the race.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let stage = state.dispatcher.cancel(task_id).await?;
    Ok(Json(DataResponse {
        data: serde_json::json!({ "cancelled_at_stage": stage }),
    }))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}/progress
///
/// Current coarse progress stage.
pub async fn task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let task = state
        .task_store
        .get(task_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Task",
            id: task_id.to_string(),
        })?;
    Ok(Json(DataResponse {
        data: serde_json::json!({
            "task_id": task.id,
            "stage": task.stage(),
        }),
    }))
}

/// GET /api/v1/tasks/{id}/progress/stream
///
/// Server-sent stream of stage transitions, fed from the event bus. The
/// current stage is emitted first so late subscribers start consistent.
pub async fn task_progress_stream(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let task = state
        .task_store
        .get(task_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Task",
            id: task_id.to_string(),
        })?;

    let initial = futures::stream::once(futures::future::ready(Ok::<
        _,
        std::convert::Infallible,
    >(
        Event::default().event("progress").data(task.stage().as_str()),
    )));

    let updates = BroadcastStream::new(state.bus.subscribe()).filter_map(move |result| {
        let event = match result {
            Ok(event)
                if event.task_id == Some(task_id)
                    && (event.event_type == EVENT_TASK_PROGRESS
                        || event.event_type == EVENT_TASK_FINISHED) =>
            {
                let stage = event
                    .payload
                    .get("stage")
                    .and_then(|s| s.as_str())
                    .unwrap_or("finished")
                    .to_string();
                Some(Ok(Event::default().event("progress").data(stage)))
            }
            // Foreign events and lagged-receiver gaps are skipped; the
            // stored task remains the authoritative record.
            _ => None,
        };
        futures::future::ready(event)
    });

    Ok(Sse::new(initial.chain(updates)).keep_alive(KeepAlive::default()))
}
