//! Root-level health check.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Router exposing `GET /health` (mounted at the root, not `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Liveness + database reachability.
async fn health(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    relay_db::health_check(&state.pool)
        .await
        .map_err(|e| AppError::InternalError(format!("Database unreachable: {e}")))?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}
