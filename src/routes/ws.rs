//! WebSocket push of ingestion events.
//!
//! Clients receive every reading and alert event published after they
//! connect. There is no snapshot and no replay; a client that falls behind
//! the broadcast buffer skips the events it missed.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::Telemetry;

pub fn router() -> Router<Telemetry> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(telemetry): State<Telemetry>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, telemetry))
}

async fn handle_socket(socket: WebSocket, telemetry: Telemetry) {
    // ---
    let (mut sender, mut receiver) = socket.split();
    let mut rx = telemetry.events().subscribe();

    info!("WebSocket subscriber connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket subscriber lagged, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Only needed to notice the client closing the socket.
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket subscriber disconnected");
}
