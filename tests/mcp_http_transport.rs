use axum::body::Body;
use axum::http::{Request, StatusCode};
use homelab_mcp::mcp::transports::http::router;
use homelab_mcp::mcp::McpEngine;
use homelab_mcp::registry::{SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};
use homelab_mcp::store::DeviceStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn build_engine(stateless: bool) -> (Arc<McpEngine>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(DeviceStore::open(&dir.path().join("devices.db")).await.expect("open store"));

    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDefinition::new(
            "ping_tool",
            "always returns ok",
            ToolCategory::Discovery,
            SideEffect::Read,
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
            Arc::new(|_args: Value| async move { Ok(ToolOutcome::text("pong")) }),
        )
        .expect("schema compiles"),
    );

    let engine = Arc::new(McpEngine::new(
        Arc::new(registry),
        store,
        "homelab-mcp".to_string(),
        "0.1.0".to_string(),
        stateless,
    ));
    (engine, dir)
}

async fn call(app: axum::Router, body: Value, session_header: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri("/mcp").header("content-type", "application/json");
    if let Some(id) = session_header {
        builder = builder.header("Mcp-Session-Id", id);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("valid json response")
    };
    (status, value)
}

#[tokio::test]
async fn stateless_initialize_then_tools_list_and_call_round_trip() {
    let (engine, _dir) = build_engine(true).await;
    let app = router(engine);

    let (status, init_response) = call(
        app.clone(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2025-03-26"}}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(init_response["result"]["serverInfo"]["name"], "homelab-mcp");

    let (status, list_response) = call(app.clone(), json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}), None).await;
    assert_eq!(status, StatusCode::OK);
    let tools = list_response["result"]["tools"].as_array().expect("tools array");
    assert!(tools.iter().any(|t| t["name"] == "ping_tool"));

    let (status, call_response) = call(
        app,
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "ping_tool", "arguments": {}}}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(call_response["result"]["isError"], false);
}

#[tokio::test]
async fn session_mode_rejects_tools_call_without_prior_initialize() {
    let (engine, _dir) = build_engine(false).await;
    let app = router(engine);

    let (status, response) = call(
        app,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        Some("session-without-init"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not initialized"));
}

#[tokio::test]
async fn session_mode_requires_session_header() {
    let (engine, _dir) = build_engine(false).await;
    let app = router(engine);

    let (status, response) = call(app, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Mcp-Session-Id"));
}

#[tokio::test]
async fn session_mode_tools_call_succeeds_after_initialize_with_same_session_id() {
    let (engine, _dir) = build_engine(false).await;
    let app = router(engine);
    let session = "fixed-session-id";

    let (status, _) = call(
        app.clone(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        Some(session),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, response) = call(
        app,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "ping_tool", "arguments": {}}}),
        Some(session),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["result"]["isError"], false);
}

#[tokio::test]
async fn notifications_receive_no_body() {
    let (engine, _dir) = build_engine(true).await;
    let app = router(engine);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(json!({"jsonrpc": "2.0", "method": "initialized"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn health_endpoint_reports_server_identity() {
    let (engine, _dir) = build_engine(true).await;
    let app = router(engine);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["server_name"], "homelab-mcp");
    assert_eq!(value["devices_tracked"], 0);
}
