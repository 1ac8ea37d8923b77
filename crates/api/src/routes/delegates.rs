//! Route definitions for fleet visibility and drain control.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::delegates;
use crate::state::AppState;

/// Routes mounted at `/delegates`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(delegates::list_delegates))
        .route("/stats", get(delegates::delegate_stats))
        .route(
            "/{account_id}/{delegate_id}/enable",
            post(delegates::enable_delegate),
        )
        .route(
            "/{account_id}/{delegate_id}/disable",
            post(delegates::disable_delegate),
        )
}
