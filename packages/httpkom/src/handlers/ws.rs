//! `GET /{server_id}/async`: a session's async messages over a WebSocket.
//!
//! Each message goes out as one JSON text frame, `{"type": .., "payload": ..}`.
//! The socket closes when the session ends or the client hangs up.

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ConnectionId;
use super::sessions::{checked, current_session};
use crate::AppState;
use crate::backend::AsyncStream;
use crate::errors::ApiResult;
use crate::metrics::GatewayStats;

pub async fn async_websocket(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    ConnectionId(id): ConnectionId,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    current_session(&state, &server_id, &id).await?;
    let messages = checked(&state, &id, state.backend.async_stream(&id).await).await?;
    let stats = state.stats.clone();
    Ok(ws.on_upgrade(move |socket| forward_async(socket, messages, id, stats)))
}

async fn forward_async(socket: WebSocket, mut messages: AsyncStream, id: String, stats: Arc<GatewayStats>) {
    GatewayStats::count(&stats.websocket_connections);
    info!(session_id = %id, "async websocket opened");
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            msg = messages.next() => {
                let Some(msg) = msg else {
                    debug!(session_id = %id, "session ended, closing websocket");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "failed to serialize async message");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
                GatewayStats::count(&stats.async_messages_sent);
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients have nothing to say on this socket.
                Some(Ok(_)) => {}
            },
        }
    }
    info!(session_id = %id, "async websocket closed");
}
