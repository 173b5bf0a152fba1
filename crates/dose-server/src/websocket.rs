/// WebSocket event hub at `/ws`.
///
/// One broadcast channel carries pre-serialized event JSON; every
/// connected client gets every event. Messages are objects with an
/// `event` discriminator: `dose_complete`, `dose_error`,
/// `emergency_stop`, `schedule_executed`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::state::AppState;

#[derive(Clone)]
pub struct WsBroadcaster {
    pub events_tx: broadcast::Sender<String>,
}

impl WsBroadcaster {
    pub fn new() -> Self {
        Self {
            events_tx: broadcast::channel(64).0,
        }
    }

    pub fn send(&self, event: String) {
        // Nobody listening is fine; events are best-effort
        let _ = self.events_tx.send(event);
    }

    pub fn dose_complete(&self, head: u8, target: f64, estimated: f64, runtime_ms: u64) {
        self.send(
            json!({
                "event": "dose_complete",
                "head": head,
                "target_volume": target,
                "estimated_volume": estimated,
                "runtime": runtime_ms,
            })
            .to_string(),
        );
    }

    pub fn dose_error(&self, head: u8, error: &str) {
        self.send(
            json!({
                "event": "dose_error",
                "head": head,
                "error": error,
            })
            .to_string(),
        );
    }

    pub fn emergency_stop(&self, timestamp: u64) {
        self.send(
            json!({
                "event": "emergency_stop",
                "timestamp": timestamp,
            })
            .to_string(),
        );
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    info!("websocket client connected");
    let mut rx = state.inner.broadcaster.events_tx.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if socket.send(Message::Text(event.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("websocket client lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("websocket client disconnected");
}
