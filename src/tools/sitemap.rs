use serde_json::{json, Value};
use std::sync::Arc;

use super::ToolContext;
use crate::error::{ToolError, ToolErrorKind};
use crate::registry::{SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};
use crate::store::model::{DeviceFilter, DeviceRole};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), crate::error::ServerError> {
    let list_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "list_devices",
        "List known devices, optionally filtered by role or staleness.",
        ToolCategory::Sitemap,
        SideEffect::Read,
        json!({
            "type": "object",
            "properties": {
                "role": {"type": "string"},
                "stale_only": {"type": "boolean", "default": false},
            },
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = list_ctx.clone();
            async move { list_devices(&ctx, args).await }
        }),
    )?);

    let history_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "device_history",
        "Fetch the append-only change history for one device.",
        ToolCategory::Sitemap,
        SideEffect::Read,
        json!({
            "type": "object",
            "properties": {"target": {"type": "string"}},
            "required": ["target"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = history_ctx.clone();
            async move { device_history(&ctx, args).await }
        }),
    )?);

    Ok(())
}

async fn list_devices(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let role = args
        .get("role")
        .and_then(Value::as_str)
        .map(parse_role)
        .transpose()?;
    let stale_only = args.get("stale_only").and_then(Value::as_bool).unwrap_or(false);

    let filter = DeviceFilter {
        role,
        stale_only,
        ..Default::default()
    };
    let devices = ctx.store.list(&filter).await?;
    Ok(ToolOutcome::json(json!({"devices": devices})))
}

async fn device_history(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let target = args
        .get("target")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'target'"))?;
    let device = match ctx.store.get_by_hostname(target).await? {
        Some(d) => d,
        None => ctx
            .store
            .get_by_ip(target)
            .await?
            .ok_or_else(|| ToolError::not_found(format!("no device matching '{target}'")))?,
    };
    let history = ctx.store.history(device.id, None).await?;
    Ok(ToolOutcome::json(json!({"history": history})))
}

fn parse_role(s: &str) -> Result<DeviceRole, ToolError> {
    match s {
        "development" => Ok(DeviceRole::Development),
        "infrastructure_host" => Ok(DeviceRole::InfrastructureHost),
        "service_host" => Ok(DeviceRole::ServiceHost),
        "network_device" => Ok(DeviceRole::NetworkDevice),
        "storage_device" => Ok(DeviceRole::StorageDevice),
        "unknown" => Ok(DeviceRole::Unknown),
        other => Err(ToolError::new(ToolErrorKind::RequirementUnmet, format!("unknown role '{other}'"))),
    }
}
