//! WebSocket push of pipeline events.
//!
//! Each client gets the current queue on connect, then every [`JobEvent`]
//! as JSON. Delivery is best effort: a client that falls behind skips the
//! missed events and should re-fetch `/api/jobs`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use pagelens_core::JobEvent;

use crate::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    let rx = state.events().subscribe();
    let queue = state.scheduler().queued();
    let snapshot = JobEvent::QueueUpdate {
        queue_length: queue.len(),
        queue,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, rx, snapshot))
}

async fn handle_socket(
    socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<JobEvent>,
    snapshot: JobEvent,
) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("WebSocket client connected");

    if !send_event(&mut sender, &snapshot).await {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            message = receiver.next() => match message {
                // Client messages carry nothing; keep reading to notice closes
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("WebSocket client disconnected");
}

/// Returns `false` once the client is gone
async fn send_event<S>(sender: &mut S, event: &JobEvent) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to encode event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}
