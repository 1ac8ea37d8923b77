//! Route definitions for the delegate streaming endpoint.

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws::handler::delegate_stream_handler;

/// Routes mounted at `/stream`.
///
/// Delegates connect with
/// `GET /stream/delegate?account_id=...&delegate_id=...&token=...`;
/// the token is verified before the WebSocket upgrade.
pub fn router() -> Router<AppState> {
    Router::new().route("/delegate", get(delegate_stream_handler))
}
