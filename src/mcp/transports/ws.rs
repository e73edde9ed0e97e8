use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use uuid::Uuid;

use crate::mcp::McpEngine;

pub fn router(engine: Arc<McpEngine>) -> Router {
    Router::new().route("/mcp/ws", get(upgrade)).with_state(engine)
}

async fn upgrade(ws: WebSocketUpgrade, State(engine): State<Arc<McpEngine>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

/// One session per connection (§4.8). Binary frames are rejected; the
/// connection closes on `shutdown` or socket error.
async fn handle_socket(mut socket: WebSocket, engine: Arc<McpEngine>) {
    let session_id = Uuid::new_v4().to_string();

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "websocket receive error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if let Some(response) = engine.handle_raw(&session_id, &text).await {
                    let encoded = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
                    if socket.send(Message::Text(encoded)).await.is_err() {
                        break;
                    }
                }
            }
            Message::Binary(_) => {
                let err = crate::mcp::RpcResponse::err(
                    serde_json::Value::Null,
                    crate::mcp::INVALID_REQUEST,
                    "binary frames are not accepted",
                    None,
                );
                let encoded = serde_json::to_string(&err).unwrap_or_else(|_| "{}".to_string());
                let _ = socket.send(Message::Text(encoded)).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    engine.sessions.remove(&session_id);
}
