use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::protocol::Session;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with the `ConnectionRegistry`.
///   2. Spawns a sender task that forwards messages from the registry channel.
///   3. Spawns the session task that handles the client's actions in order.
///   4. Reads inbound frames on the current task and hands text to the session.
///   5. Deregisters on disconnect. A job the session already submitted still
///      runs to completion; only its replies to this connection are lost.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = state.registry.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let session = Session::new(state.clone(), conn_id.clone());
    tokio::spawn(session.run(inbound_rx));

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text.to_string()).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!(conn_id = %conn_id, "Ignoring binary frame");
            }
            Ok(Message::Ping(_)) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    drop(inbound_tx);
    state.registry.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
