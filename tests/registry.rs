use homelab_mcp::error::{ToolError, ToolErrorKind};
use homelab_mcp::registry::{requires_confirmation, DispatchError, SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};
use serde_json::json;
use std::sync::Arc;

fn echo_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" }
        },
        "required": ["message"],
        "additionalProperties": false
    })
}

fn echo_definition(name: &str, side_effect: SideEffect) -> ToolDefinition {
    ToolDefinition::new(
        name,
        "echoes the message field back",
        ToolCategory::Discovery,
        side_effect,
        echo_schema(),
        Arc::new(|args: serde_json::Value| async move {
            let message = args
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(ToolOutcome::text(message))
        }),
    )
    .expect("schema compiles")
}

#[tokio::test]
async fn dispatch_rejects_arguments_that_fail_schema_validation_before_calling_handler() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_definition("echo", SideEffect::Read));

    let result = registry.dispatch("echo", json!({"wrong_field": 1})).await;
    assert!(matches!(result, Err(DispatchError::InvalidParams(_))));
}

#[tokio::test]
async fn dispatch_invokes_handler_when_arguments_are_valid() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_definition("echo", SideEffect::Read));

    let outcome = registry
        .dispatch("echo", json!({"message": "hello"}))
        .await
        .expect("dispatch succeeds");
    assert!(!outcome.is_error);
}

#[tokio::test]
async fn dispatch_reports_unknown_tool_name() {
    let registry = ToolRegistry::new();
    let result = registry.dispatch("does_not_exist", json!({})).await;
    assert!(matches!(result, Err(DispatchError::NotFound)));
}

#[test]
fn list_preserves_registration_order() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_definition("zeta", SideEffect::Read));
    registry.register(echo_definition("alpha", SideEffect::Read));
    registry.register(echo_definition("middle", SideEffect::Read));

    let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["zeta", "alpha", "middle"]);
}

#[test]
fn destructive_tools_require_explicit_confirm() {
    let err = requires_confirmation(SideEffect::Destructive, &json!({})).unwrap_err();
    assert_eq!(err.kind, ToolErrorKind::RequirementUnmet);

    requires_confirmation(SideEffect::Destructive, &json!({"confirm": true}))
        .expect("confirmed destructive call is allowed");
}

#[test]
fn non_destructive_tools_do_not_require_confirm() {
    requires_confirmation(SideEffect::Mutate, &json!({})).expect("mutate tools need no confirm");
    requires_confirmation(SideEffect::Read, &json!({})).expect("read tools need no confirm");
}

#[test]
fn tool_error_carries_kind_message_and_details() {
    let err = ToolError::not_found("device 42 not found");
    assert_eq!(err.kind, ToolErrorKind::NotFound);
    assert_eq!(err.message, "device 42 not found");
}
