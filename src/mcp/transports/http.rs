use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::mcp::{McpEngine, RpcResponse, INVALID_REQUEST};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Streamable HTTP transport (§4.8): `POST /mcp/v1/messages` (aliased as
/// `/mcp` and `/messages`), plus `GET /health`. Session identification uses
/// `Mcp-Session-Id`; in stateless mode every request gets a fresh session
/// and the header is ignored.
pub fn router(engine: Arc<McpEngine>) -> Router {
    Router::new()
        .route("/mcp/v1/messages", post(handle_message))
        .route("/mcp", post(handle_message))
        .route("/messages", post(handle_message))
        .route("/health", get(health))
        .with_state(engine)
}

async fn handle_message(State(engine): State<Arc<McpEngine>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let raw = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, RpcResponse::err(serde_json::Value::Null, INVALID_REQUEST, "body is not valid UTF-8", None));
        }
    };

    let session_id = match resolve_session(&engine, &headers) {
        Ok(id) => id,
        Err(resp) => return json_error(StatusCode::BAD_REQUEST, resp),
    };

    match engine.handle_raw(&session_id, raw).await {
        Some(response) => {
            let mut http_response = Json(response).into_response();
            if !engine.stateless {
                if let Ok(value) = HeaderValue::from_str(&session_id) {
                    http_response.headers_mut().insert(SESSION_HEADER, value);
                }
            }
            http_response
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Stateless mode ignores the session header entirely and synthesizes a
/// fresh session per request; session mode requires the header or rejects
/// the request with `InvalidRequest` (§4.8, boundary behaviors in §8).
fn resolve_session(engine: &McpEngine, headers: &HeaderMap) -> Result<String, RpcResponse> {
    if engine.stateless {
        return Ok(Uuid::new_v4().to_string());
    }
    match headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) => Ok(id.to_string()),
        None => Err(RpcResponse::err(
            serde_json::Value::Null,
            INVALID_REQUEST,
            "missing Mcp-Session-Id header",
            None,
        )),
    }
}

fn json_error(status: StatusCode, response: RpcResponse) -> axum::response::Response {
    (status, Json(response)).into_response()
}

async fn health(State(engine): State<Arc<McpEngine>>) -> impl IntoResponse {
    let devices_tracked = engine
        .store
        .list(&crate::store::model::DeviceFilter::default())
        .await
        .map(|d| d.len())
        .unwrap_or(0);
    Json(json!({
        "status": "ok",
        "initialized": true,
        "uptime_seconds": engine.started_at.elapsed().as_secs(),
        "devices_tracked": devices_tracked,
        "active_sessions": engine.sessions.len(),
        "server_name": engine.server_name,
        "server_version": engine.server_version,
        "tools_registered": engine.registry.list().len(),
    }))
}
