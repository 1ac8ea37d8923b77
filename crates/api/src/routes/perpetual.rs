//! Route definitions for perpetual task management.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::perpetual;
use crate::state::AppState;

/// Routes mounted at `/perpetual-tasks`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(perpetual::create_perpetual_task).get(perpetual::list_perpetual_tasks),
        )
        .route(
            "/{id}",
            get(perpetual::get_perpetual_task).delete(perpetual::delete_perpetual_task),
        )
        .route("/{id}/reset", post(perpetual::reset_perpetual_task))
        .route("/{id}/pause", post(perpetual::pause_perpetual_task))
        .route("/{id}/resume", post(perpetual::resume_perpetual_task))
}
