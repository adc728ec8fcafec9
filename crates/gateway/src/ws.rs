//! WebSocket subscriptions to a transcript's event stream.
//!
//! Flow:
//! 1. Client connects to `/v1/transcripts/:id/events`
//! 2. Every persisted event replays in insertion order
//! 3. Live events stream until either side disconnects

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::state::AppState;

pub async fn transcript_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(transcript_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, transcript_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, transcript_id: String) {
    let (history, mut live) = state.broadcaster.subscribe(&transcript_id);
    tracing::debug!(
        transcript_id = %transcript_id,
        history = history.len(),
        "transcript subscriber attached"
    );

    // Historical replay before any live delivery.
    for event in history {
        let Ok(json) = serde_json::to_string(&event) else {
            continue;
        };
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    // Clients only ever send pings or close frames.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            event = live.recv() => {
                match event {
                    Ok(payload) => {
                        let Ok(json) = serde_json::to_string(&payload) else {
                            continue;
                        };
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // This subscriber fell behind; later DAG snapshots
                        // supersede the ones it missed.
                        tracing::warn!(missed, "subscriber lagged, continuing");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!(transcript_id = %transcript_id, "transcript subscriber detached");
}
