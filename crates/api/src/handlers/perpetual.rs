//! Handlers for the `/perpetual-tasks` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use relay_db::models::perpetual_task::{CreatePerpetualTask, PerpetualTaskListQuery};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::response::{ack, DataResponse};
use crate::state::AppState;

/// Optional account scoping on id-addressed endpoints: when supplied, a
/// record belonging to another account reads as not-found.
#[derive(Debug, Default, Deserialize)]
pub struct AccountScope {
    pub account_id: Option<String>,
}

/// POST /api/v1/perpetual-tasks
///
/// Create a perpetual task in UNASSIGNED. The assignment loop places it
/// once an eligible delegate is connected. Returns 201 with the record;
/// a suppressed duplicate returns the existing record instead.
pub async fn create_perpetual_task(
    State(state): State<AppState>,
    Json(input): Json<CreatePerpetualTask>,
) -> AppResult<impl IntoResponse> {
    let record = state.perpetual.create(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: record })))
}

/// GET /api/v1/perpetual-tasks
pub async fn list_perpetual_tasks(
    State(state): State<AppState>,
    Query(params): Query<PerpetualTaskListQuery>,
) -> AppResult<impl IntoResponse> {
    let records = state.perpetual.list(params.account_id.as_deref()).await?;
    Ok(Json(DataResponse { data: records }))
}

/// GET /api/v1/perpetual-tasks/{id}
pub async fn get_perpetual_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(scope): Query<AccountScope>,
) -> AppResult<impl IntoResponse> {
    let record = state.perpetual.get(id, scope.account_id.as_deref()).await?;
    Ok(Json(DataResponse { data: record }))
}

/// DELETE /api/v1/perpetual-tasks/{id}
pub async fn delete_perpetual_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(scope): Query<AccountScope>,
) -> AppResult<impl IntoResponse> {
    state
        .perpetual
        .delete(id, scope.account_id.as_deref())
        .await?;
    Ok(Json(ack()))
}

/// POST /api/v1/perpetual-tasks/{id}/reset
pub async fn reset_perpetual_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(scope): Query<AccountScope>,
) -> AppResult<impl IntoResponse> {
    state
        .perpetual
        .reset(id, scope.account_id.as_deref())
        .await?;
    Ok(Json(ack()))
}

/// POST /api/v1/perpetual-tasks/{id}/pause
pub async fn pause_perpetual_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(scope): Query<AccountScope>,
) -> AppResult<impl IntoResponse> {
    state
        .perpetual
        .pause(id, scope.account_id.as_deref())
        .await?;
    Ok(Json(ack()))
}

/// POST /api/v1/perpetual-tasks/{id}/resume
pub async fn resume_perpetual_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(scope): Query<AccountScope>,
) -> AppResult<impl IntoResponse> {
    state
        .perpetual
        .resume(id, scope.account_id.as_deref())
        .await?;
    Ok(Json(ack()))
}
