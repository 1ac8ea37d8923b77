//! Route definitions for one-shot task dispatch.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// The sync-lane submission lives in [`sync_router`], mounted outside
/// the request-timeout layer: its handler legitimately blocks for the
/// task's own execution budget.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(tasks::submit_task).get(tasks::list_tasks))
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
        .route("/{id}/progress", get(tasks::task_progress))
        .route("/{id}/progress/stream", get(tasks::task_progress_stream))
}

/// Full-path router for the blocking sync submission.
pub fn sync_router() -> Router<AppState> {
    Router::new().route("/api/v1/tasks/sync", post(tasks::submit_task_sync))
}
