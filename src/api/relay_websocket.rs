use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::relay::{ClientMessage, RelayServer, ServerMessage};

/// Pumps one WebSocket connection: registers it with the relay server,
/// forwards its outbound channel to the socket, and feeds parsed inbound
/// frames into the dispatcher until the transport closes.
pub async fn handle_live_websocket(websocket: WebSocket, server: Arc<RelayServer>) {
    tracing::info!("New live WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let connection = server.connect(tx).await;
    let conn_id = connection.id.clone();

    // Spawn task to send messages to the client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => handle_websocket_message(&server, &connection, message).await,
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    server.disconnect(&conn_id).await;
    sender_task.abort();
    tracing::info!(conn_id = %conn_id, "Live WebSocket connection closed");
}

async fn handle_websocket_message(
    server: &Arc<RelayServer>,
    connection: &Arc<crate::relay::ClientConnection>,
    message: Message,
) {
    if let Ok(text) = message.to_str() {
        tracing::debug!(conn_id = %connection.id, "Received live message: {}", text);

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(parsed) => {
                server.handle_message(connection, parsed).await;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_message = %text,
                    "Failed to parse live message"
                );
            }
        }
    }
}
