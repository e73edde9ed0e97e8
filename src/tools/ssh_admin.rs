use serde_json::{json, Value};
use std::sync::Arc;

use super::ToolContext;
use crate::error::{ToolError, ToolErrorKind};
use crate::registry::{SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};
use crate::ssh::{AuthMethod, SshTarget};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), crate::error::ServerError> {
    let setup_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "setup_mcp_admin",
        "Bootstrap the managed admin user on a host: create it, grant NOPASSWD sudo, install the server's public key.",
        ToolCategory::SshAdmin,
        SideEffect::Mutate,
        json!({
            "type": "object",
            "properties": {
                "hostname": {"type": "string"},
                "admin_username": {"type": "string"},
                "admin_password": {"type": "string"},
                "force_update_key": {"type": "boolean", "default": false},
            },
            "required": ["hostname", "admin_username"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = setup_ctx.clone();
            async move { setup_mcp_admin(&ctx, args).await }
        }),
    )?);

    let verify_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "verify_mcp_admin",
        "Check that the managed admin user can authenticate with the server's key and use passwordless sudo.",
        ToolCategory::SshAdmin,
        SideEffect::Read,
        json!({
            "type": "object",
            "properties": {
                "hostname": {"type": "string"},
            },
            "required": ["hostname"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = verify_ctx.clone();
            async move { verify_mcp_admin(&ctx, args).await }
        }),
    )?);

    Ok(())
}

async fn setup_mcp_admin(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let hostname = args
        .get("hostname")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'hostname'"))?;
    let admin_username = args
        .get("admin_username")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'admin_username'"))?;
    let force_update_key = args.get("force_update_key").and_then(Value::as_bool).unwrap_or(false);

    let admin_auth = match args.get("admin_password").and_then(Value::as_str) {
        Some(pw) => AuthMethod::Password(pw.to_string()),
        None => AuthMethod::Agent,
    };

    let target = SshTarget::new(hostname.to_string(), admin_username.to_string());
    let outcome = ctx.ssh.bootstrap_admin(&target, &admin_auth, "mcp_admin", force_update_key).await?;

    Ok(ToolOutcome::json(serde_json::to_value(outcome).unwrap_or(Value::Null)))
}

async fn verify_mcp_admin(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let hostname = args
        .get("hostname")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'hostname'"))?;
    let target = SshTarget::new(hostname.to_string(), "mcp_admin".to_string());
    let outcome = ctx.ssh.verify_admin(&target).await?;
    Ok(ToolOutcome::json(serde_json::to_value(outcome).unwrap_or(Value::Null)))
}
