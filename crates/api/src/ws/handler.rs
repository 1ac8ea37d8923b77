//! Delegate streaming endpoint.
//!
//! A delegate opens one long-lived WebSocket scoped to its
//! `{account_id, delegate_id}` pair, authenticated by a stream token
//! checked *before* the upgrade. After the upgrade the connection holds
//! a registry slot managed by two tasks (sender + receiver); the
//! receiver loop decodes inbound frames and feeds the dispatch engine.
//! Disconnect -- graceful or not -- releases the slot on the way out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use relay_core::filter;
use relay_core::task_events::{
    EVENT_DELEGATE_CONNECTED, EVENT_DELEGATE_DISCONNECTED, MSG_TYPE_REGISTERED,
};
use relay_events::DispatchEvent;
use serde::Deserialize;
use serde_json::json;

use crate::auth::token::validate_stream_token;
use crate::error::AppError;
use crate::state::AppState;
use crate::ws::protocol::DelegateMessage;

/// Query parameters for the delegate stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub account_id: String,
    pub delegate_id: String,
    pub token: String,
}

/// HTTP handler that validates the delegate's identity and upgrades the
/// connection to WebSocket.
pub async fn delegate_stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> Response {
    if let Err(e) = filter::validate_party_id("account", &query.account_id)
        .and_then(|_| filter::validate_party_id("delegate", &query.delegate_id))
    {
        return AppError::Core(e).into_response();
    }

    if let Err(e) = validate_stream_token(
        &state.config.stream_auth.secret,
        &query.token,
        &query.account_id,
        &query.delegate_id,
    ) {
        tracing::warn!(
            account_id = %query.account_id,
            delegate_id = %query.delegate_id,
            "Rejected delegate stream: invalid token",
        );
        return AppError::Core(e).into_response();
    }

    ws.on_upgrade(move |socket| {
        handle_delegate_socket(socket, state, query.account_id, query.delegate_id)
    })
}

/// Manage a single delegate connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection slot with the delegate registry.
///   2. Spawns a sender task that forwards messages from the slot's
///      channel.
///   3. Processes inbound frames on the current task.
///   4. Releases the slot on disconnect.
async fn handle_delegate_socket(
    socket: WebSocket,
    state: AppState,
    account_id: String,
    delegate_id: String,
) {
    let now = state.clock.now();
    let mut rx = state.registry.add(&account_id, &delegate_id, now).await;
    tracing::info!(account_id = %account_id, delegate_id = %delegate_id, "Delegate connected");
    state.bus.publish(
        DispatchEvent::new(EVENT_DELEGATE_CONNECTED)
            .for_account(&account_id)
            .with_payload(json!({ "delegate_id": delegate_id })),
    );

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_delegate = delegate_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(delegate_id = %sender_delegate, "Delegate sink closed");
                break;
            }
        }
    });

    // Receiver loop: any frame counts as liveness.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                state
                    .registry
                    .touch_heartbeat(&account_id, &delegate_id, state.clock.now())
                    .await;
            }
            Ok(Message::Text(text)) => {
                state
                    .registry
                    .touch_heartbeat(&account_id, &delegate_id, state.clock.now())
                    .await;
                handle_frame(&state, &account_id, &delegate_id, text.as_str()).await;
            }
            Ok(_) => {
                // Binary/Ping frames carry no dispatch meaning.
            }
            Err(e) => {
                tracing::debug!(
                    delegate_id = %delegate_id,
                    error = %e,
                    "Delegate stream receive error",
                );
                break;
            }
        }
    }

    // Clean up: release the slot and abort the sender task.
    state.registry.remove(&account_id, &delegate_id).await;
    send_task.abort();
    state.bus.publish(
        DispatchEvent::new(EVENT_DELEGATE_DISCONNECTED)
            .for_account(&account_id)
            .with_payload(json!({ "delegate_id": delegate_id })),
    );
    tracing::info!(account_id = %account_id, delegate_id = %delegate_id, "Delegate disconnected");
}

/// Decode one inbound frame and feed it to the engine.
///
/// Malformed or unknown frames are logged and dropped -- a misbehaving
/// delegate must never take the stream down.
async fn handle_frame(state: &AppState, account_id: &str, delegate_id: &str, raw: &str) {
    let message: DelegateMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(delegate_id, error = %e, "Undecodable delegate frame dropped");
            return;
        }
    };

    match message {
        DelegateMessage::Register(data) => {
            if let Err(e) = filter::validate_capabilities(&data.capabilities) {
                tracing::warn!(delegate_id, error = %e, "Rejected capability registration");
                return;
            }
            state
                .registry
                .set_capabilities(account_id, delegate_id, data.capabilities.clone())
                .await;
            let ack = json!({
                "type": MSG_TYPE_REGISTERED,
                "data": { "capabilities": data.capabilities },
            });
            state
                .registry
                .send_to(account_id, delegate_id, Message::Text(ack.to_string().into()))
                .await;
            tracing::info!(delegate_id, "Delegate registered capabilities");
        }

        DelegateMessage::Heartbeat => {
            // Liveness was already recorded for the frame itself.
        }

        DelegateMessage::TaskAcquire(data) => {
            match state.dispatcher.handle_acquire(data.task_id, delegate_id).await {
                Ok(Some(task)) => {
                    state.broadcaster.send_task_payload(&task).await;
                }
                Ok(None) => {
                    // Lost race: deliberately no reply.
                }
                Err(e) => {
                    tracing::error!(task_id = %data.task_id, error = %e, "Acquire failed");
                }
            }
        }

        DelegateMessage::TaskStarted(data) => {
            if let Err(e) = state.dispatcher.handle_started(data.task_id, delegate_id).await {
                tracing::error!(task_id = %data.task_id, error = %e, "task_started failed");
            }
        }

        DelegateMessage::TaskResult(data) => {
            if let Err(e) = state.dispatcher.handle_result(delegate_id, &data).await {
                tracing::error!(task_id = %data.task_id, error = %e, "task_result failed");
            }
        }

        DelegateMessage::PerpetualHeartbeat(data) => {
            if let Err(e) = state
                .perpetual
                .record_heartbeat(data.perpetual_task_id, delegate_id)
                .await
            {
                tracing::error!(
                    perpetual_task_id = %data.perpetual_task_id,
                    error = %e,
                    "perpetual_heartbeat failed",
                );
            }
        }
    }
}
