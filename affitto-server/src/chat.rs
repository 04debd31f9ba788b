//! WebSocket chat: handshake, connection registration, message delivery and
//! history. One event from a connection is handled to completion before the
//! next is read, so a sender's acks come back in request order.

use affitto_core::{ClientEvent, Error, EventError, ServerEvent, User};
use axum::extract::ws::{Message as WsFrame, WebSocket};
use axum::extract::{Extension, Query, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::user_for_token;
use crate::error::ChatError;
use crate::registry::ConnHandle;
use crate::store::NewMessage;
use crate::AppState;

/// Handler for GET /ws. The handshake authenticates via the `token` query
/// parameter before the upgrade completes.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let token = params.get("token").cloned();
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    // Resolve the token to a user before anything else; an unauthenticated
    // socket gets one error frame and is closed.
    let user = match token {
        Some(token) => match user_for_token(&state.pool, &token).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                send_error_frame(&mut socket, "unauthorized", "invalid token").await;
                return;
            }
            Err(e) => {
                tracing::error!("ws auth lookup failed: {}", e);
                send_error_frame(&mut socket, "internal_error", "auth lookup failed").await;
                return;
            }
        },
        None => {
            send_error_frame(&mut socket, "unauthorized", "missing token").await;
            return;
        }
    };

    // `tx` is the channel other sessions use to push events to this client
    // (server -> client); the registry hands out clones of the handle.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let handle = ConnHandle::new(tx);

    let (mut sender, mut receiver) = socket.split();

    // Forward task: everything queued on rx goes out on the socket.
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(WsFrame::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    tracing::info!("ws session open for user {}", user.user_id);

    // Read loop: one event handled to completion before the next is parsed.
    while let Some(Ok(frame)) = receiver.next().await {
        match frame {
            WsFrame::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_event(&state, &user, &handle, event).await,
                Err(e) => {
                    tracing::debug!("ignoring unparsable ws frame from {}: {}", user.user_id, e);
                }
            },
            WsFrame::Close(_) => break,
            _ => {}
        }
    }

    // Disconnect: drop the registration (identity-checked, so a reconnect
    // that already displaced us is left alone), then let the forward task
    // drain and exit.
    state.registry.unregister(&handle);
    drop(handle);
    let _ = forward_task.await;
    tracing::info!("ws session closed for user {}", user.user_id);
}

/// Dispatch one inbound chat event. Every failure is converted into an error
/// event scoped to this connection; nothing here tears the socket down or
/// touches other users.
pub async fn handle_event(state: &AppState, user: &User, handle: &ConnHandle, event: ClientEvent) {
    match event {
        ClientEvent::UserConnected(user_id) => {
            // Register only the authenticated identity; a spoofed id gets an
            // error instead of a mapping.
            if user_id == user.user_id {
                state.registry.register(&user_id, handle.clone());
                tracing::info!("user {} registered for live delivery", user_id);
            } else {
                handle.send(&ServerEvent::MessageError(EventError::new(Error::new(
                    "identity_mismatch",
                    "userId does not match the authenticated session",
                ))));
            }
        }
        ClientEvent::SendMessage(send) => {
            if send.sender_id != user.user_id {
                handle.send(&ServerEvent::MessageError(EventError::new(Error::new(
                    "identity_mismatch",
                    "senderId does not match the authenticated session",
                ))));
                return;
            }
            let new = NewMessage {
                property_id: send.property_id,
                sender_id: send.sender_id,
                receiver_id: send.receiver_id,
                body: send.message,
            };
            match state.store.append(new).await {
                Ok(mut stored) => {
                    // Receiver online: push immediately. A dead channel is
                    // treated exactly like an absent peer; the durable row
                    // covers it via history on reconnect.
                    if let Some(peer) = state.registry.lookup(&stored.receiver_id) {
                        if peer.send(&ServerEvent::NewMessage(stored.clone())) {
                            state.store.mark_delivered(&stored.message_id).await;
                            stored.delivered = true;
                        }
                    }
                    // The sender always gets the ack, receiver present or not.
                    handle.send(&ServerEvent::MessageSent(stored));
                }
                Err(e) => {
                    if let ChatError::Persistence(ref cause) = e {
                        tracing::error!("message append failed: {}", cause);
                    }
                    handle.send(&ServerEvent::MessageError(EventError::new(e.to_wire())));
                }
            }
        }
        ClientEvent::GetMessages(req) => {
            match state
                .store
                .query_thread(&req.property_id, &req.user_id_1, &req.user_id_2)
                .await
            {
                Ok(messages) => {
                    handle.send(&ServerEvent::MessagesHistory(messages));
                }
                Err(e) => {
                    if let ChatError::Persistence(ref cause) = e {
                        tracing::error!("history query failed: {}", cause);
                    }
                    handle.send(&ServerEvent::MessagesError(EventError::new(e.to_wire())));
                }
            }
        }
    }
}

async fn send_error_frame(socket: &mut WebSocket, code: &str, message: &str) {
    let event = ServerEvent::MessageError(EventError::new(Error::new(code, message)));
    if let Ok(text) = serde_json::to_string(&event) {
        let _ = socket.send(WsFrame::Text(text)).await;
    }
}
