use serde_json::{json, Value};

use super::session::SessionState;
use super::{
    McpEngine, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PROTOCOL_VERSION,
};
use crate::registry::DispatchError;

pub async fn dispatch(engine: &McpEngine, session_id: &str, req: &RpcRequest) -> RpcResponse {
    let id = req.id.clone().unwrap_or(Value::Null);

    match req.method.as_str() {
        "initialize" => initialize(engine, session_id, id, &req.params),
        "initialized" => {
            engine.sessions.update(session_id, |s| s.state = SessionState::Initialized);
            RpcResponse::ok(id, Value::Null)
        }
        "tools/list" => tools_list(engine, session_id, id),
        "tools/call" => tools_call(engine, session_id, id, &req.params).await,
        "ping" => RpcResponse::ok(id, json!({})),
        "shutdown" => {
            engine.sessions.update(session_id, |s| s.state = SessionState::ShuttingDown);
            RpcResponse::ok(id, Value::Null)
        }
        _ => RpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown method '{}'", req.method), None),
    }
}

fn initialize(engine: &McpEngine, session_id: &str, id: Value, params: &Value) -> RpcResponse {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION)
        .to_string();
    let client_info = params.get("clientInfo").cloned();
    let capabilities = params.get("capabilities").cloned();

    engine.sessions.update(session_id, |s| {
        s.state = SessionState::Initialized;
        s.protocol_version = Some(protocol_version.clone());
        s.client_info = client_info.clone();
        s.capabilities = capabilities.clone();
    });

    RpcResponse::ok(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {"listChanged": false},
            },
            "serverInfo": {
                "name": engine.server_name,
                "version": engine.server_version,
            },
        }),
    )
}

/// Requires `initialize` to have run first, except in stateless mode where
/// every request is its own freshly initialized session (§4.7, §4.8, §8).
fn requires_initialized(engine: &McpEngine, session_id: &str) -> Option<RpcResponse> {
    if engine.stateless {
        return None;
    }
    if engine.sessions.is_initialized(session_id) {
        None
    } else {
        Some(RpcResponse::err(
            Value::Null,
            INVALID_REQUEST,
            "session is not initialized; call 'initialize' first",
            None,
        ))
    }
}

fn tools_list(engine: &McpEngine, session_id: &str, id: Value) -> RpcResponse {
    if let Some(mut err) = requires_initialized(engine, session_id) {
        err.id = id;
        return err;
    }
    let tools = engine.registry.list();
    RpcResponse::ok(id, json!({"tools": tools}))
}

async fn tools_call(engine: &McpEngine, session_id: &str, id: Value, params: &Value) -> RpcResponse {
    if let Some(mut err) = requires_initialized(engine, session_id) {
        err.id = id;
        return err;
    }

    let name = match params.get("name").and_then(Value::as_str) {
        Some(n) => n,
        None => return RpcResponse::err(id, INVALID_PARAMS, "missing 'name'", None),
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match engine.registry.dispatch(name, arguments).await {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(value) => RpcResponse::ok(id, value),
            Err(e) => RpcResponse::err(id, INTERNAL_ERROR, format!("serializing tool result: {e}"), None),
        },
        Err(DispatchError::NotFound) => RpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown tool '{name}'"), None),
        Err(DispatchError::InvalidParams(detail)) => RpcResponse::err(id, INVALID_PARAMS, detail, None),
    }
}
