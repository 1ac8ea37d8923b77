//! Handlers for the `/delegates` resource.
//!
//! Everything here reads this replica's in-memory registry -- delegate
//! connections are runtime state, never durable rows.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use relay_core::error::CoreError;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::{ack, DataResponse};
use crate::state::AppState;

/// Query parameters for `GET /api/v1/delegates`.
#[derive(Debug, Default, Deserialize)]
pub struct DelegateListQuery {
    pub account_id: Option<String>,
}

/// Aggregated fleet counts for this replica.
#[derive(Debug, Serialize)]
pub struct FleetStats {
    pub total_connected: usize,
    pub enabled: usize,
    pub accounts: usize,
}

/// GET /api/v1/delegates
///
/// Currently connected delegates, optionally scoped to one account.
pub async fn list_delegates(
    State(state): State<AppState>,
    Query(params): Query<DelegateListQuery>,
) -> AppResult<impl IntoResponse> {
    let snapshots = match params.account_id.as_deref() {
        Some(account_id) => state.registry.connected_for_account(account_id).await,
        None => state.registry.snapshot_all().await,
    };
    Ok(Json(DataResponse { data: snapshots }))
}

/// GET /api/v1/delegates/stats
pub async fn delegate_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let snapshots = state.registry.snapshot_all().await;
    let accounts = snapshots
        .iter()
        .map(|s| s.account_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();
    let stats = FleetStats {
        total_connected: snapshots.len(),
        enabled: snapshots.iter().filter(|s| s.enabled).count(),
        accounts,
    };
    Ok(Json(DataResponse { data: stats }))
}

/// POST /api/v1/delegates/{account_id}/{delegate_id}/enable
pub async fn enable_delegate(
    State(state): State<AppState>,
    Path((account_id, delegate_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    set_enabled(&state, &account_id, &delegate_id, true).await
}

/// POST /api/v1/delegates/{account_id}/{delegate_id}/disable
///
/// A disabled delegate keeps its stream but receives no further work
/// until re-enabled (drain for maintenance).
pub async fn disable_delegate(
    State(state): State<AppState>,
    Path((account_id, delegate_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    set_enabled(&state, &account_id, &delegate_id, false).await
}

async fn set_enabled(
    state: &AppState,
    account_id: &str,
    delegate_id: &str,
    enabled: bool,
) -> AppResult<impl IntoResponse> {
    if !state
        .registry
        .set_enabled(account_id, delegate_id, enabled)
        .await
    {
        return Err(CoreError::NotFound {
            entity: "Delegate",
            id: format!("{account_id}/{delegate_id}"),
        }
        .into());
    }
    tracing::info!(account_id, delegate_id, enabled, "Delegate delivery toggled");
    Ok(Json(ack()))
}
