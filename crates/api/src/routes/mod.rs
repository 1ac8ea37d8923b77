pub mod delegates;
pub mod health;
pub mod perpetual;
pub mod stream;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /tasks                                   submit (POST), list (GET)
/// /tasks/sync                              submit + wait (POST; mounted
///                                          outside the request timeout)
/// /tasks/{id}                              get (GET)
/// /tasks/{id}/cancel                       cancel (POST)
/// /tasks/{id}/progress                     current stage (GET)
/// /tasks/{id}/progress/stream              stage stream, SSE (GET)
///
/// /perpetual-tasks                         create (POST), list (GET)
/// /perpetual-tasks/{id}                    get (GET), delete (DELETE)
/// /perpetual-tasks/{id}/reset              reset (POST)
/// /perpetual-tasks/{id}/pause              pause (POST)
/// /perpetual-tasks/{id}/resume             resume (POST)
///
/// /delegates                               connected fleet (GET)
/// /delegates/stats                         fleet counts (GET)
/// /delegates/{account}/{delegate}/enable   resume delivery (POST)
/// /delegates/{account}/{delegate}/disable  drain delivery (POST)
///
/// /stream/delegate                         delegate WebSocket (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/perpetual-tasks", perpetual::router())
        .nest("/delegates", delegates::router())
        .nest("/stream", stream::router())
}
