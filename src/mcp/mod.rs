pub mod methods;
pub mod session;
pub mod transports;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::registry::ToolRegistry;
use crate::store::DeviceStore;
use session::SessionTable;

pub const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(id: Value, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }
}

/// Shared state every transport dispatches against (§4.7's "single
/// `dispatch(message) → message` function so behavior cannot diverge",
/// §9 redesign note).
pub struct McpEngine {
    pub registry: Arc<ToolRegistry>,
    pub sessions: SessionTable,
    pub store: Arc<DeviceStore>,
    pub server_name: String,
    pub server_version: String,
    pub stateless: bool,
    pub started_at: Instant,
}

impl McpEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: Arc<DeviceStore>,
        server_name: String,
        server_version: String,
        stateless: bool,
    ) -> Self {
        Self {
            registry,
            sessions: SessionTable::new(),
            store,
            server_name,
            server_version,
            stateless,
            started_at: Instant::now(),
        }
    }

    /// Parses a single raw JSON-RPC message and dispatches it. Returns
    /// `None` for notifications (no `id`), which receive no response.
    pub async fn handle_raw(&self, session_id: &str, raw: &str) -> Option<RpcResponse> {
        let parsed: Result<RpcRequest, _> = serde_json::from_str(raw);
        match parsed {
            Ok(req) => self.handle(session_id, req).await,
            Err(e) => Some(RpcResponse::err(Value::Null, PARSE_ERROR, format!("parse error: {e}"), None)),
        }
    }

    pub async fn handle(&self, session_id: &str, req: RpcRequest) -> Option<RpcResponse> {
        let is_notification = req.id.is_none();
        let id = req.id.clone().unwrap_or(Value::Null);

        if req.jsonrpc != "2.0" {
            return respond(is_notification, RpcResponse::err(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"", None));
        }

        let response = methods::dispatch(self, session_id, &req).await;
        respond(is_notification, response)
    }
}

fn respond(is_notification: bool, response: RpcResponse) -> Option<RpcResponse> {
    if is_notification {
        None
    } else {
        Some(response)
    }
}
