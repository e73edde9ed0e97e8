use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::ToolContext;
use crate::error::{ToolError, ToolErrorKind};
use crate::installer::InstallOptions;
use crate::registry::{self, SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), crate::error::ServerError> {
    let list_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "list_services",
        "List every service template available for installation.",
        ToolCategory::ServiceInstall,
        SideEffect::Read,
        json!({"type": "object", "properties": {}, "additionalProperties": false}),
        Arc::new(move |_args: Value| {
            let ctx = list_ctx.clone();
            async move { Ok(ToolOutcome::json(json!({"services": ctx.installer.list_services()}))) }
        }),
    )?);

    let plan_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "plan_install",
        "Render a service template against a target without making any changes; reports whether the install would be a no-op.",
        ToolCategory::ServiceInstall,
        SideEffect::Read,
        install_args_schema(false),
        Arc::new(move |args: Value| {
            let ctx = plan_ctx.clone();
            async move { plan_install(&ctx, args).await }
        }),
    )?);

    let install_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "install_service",
        "Install a service template onto a target device, going through requirement checks, execution, and health verification.",
        ToolCategory::ServiceInstall,
        SideEffect::Mutate,
        install_args_schema(false),
        Arc::new(move |args: Value| {
            let ctx = install_ctx.clone();
            async move { install_service(&ctx, args).await }
        }),
    )?);

    let uninstall_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "uninstall_service",
        "Tear down an installed service and remove its record from the inventory.",
        ToolCategory::ServiceInstall,
        SideEffect::Destructive,
        install_args_schema(true),
        Arc::new(move |args: Value| {
            let ctx = uninstall_ctx.clone();
            async move { uninstall_service(&ctx, args).await }
        }),
    )?);

    let health_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "service_health",
        "Run the health probes declared by an installed service's template and report the result.",
        ToolCategory::ServiceInstall,
        SideEffect::Read,
        json!({
            "type": "object",
            "properties": {"target": {"type": "string"}, "service": {"type": "string"}},
            "required": ["target", "service"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = health_ctx.clone();
            async move { service_health(&ctx, args).await }
        }),
    )?);

    Ok(())
}

fn install_args_schema(destructive: bool) -> Value {
    let mut properties = json!({
        "target": {"type": "string", "description": "device hostname or ip_address"},
        "service": {"type": "string"},
        "config": {"type": "object"},
    });
    if destructive {
        properties["confirm"] = json!({"type": "boolean"});
    }
    let mut required = vec!["target", "service"];
    if destructive {
        required.push("confirm");
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

async fn resolve_device(ctx: &ToolContext, target: &str) -> Result<crate::store::model::Device, ToolError> {
    if let Some(device) = ctx.store.get_by_hostname(target).await? {
        return Ok(device);
    }
    if let Some(device) = ctx.store.get_by_ip(target).await? {
        return Ok(device);
    }
    Err(ToolError::not_found(format!("no device matching '{target}'")))
}

fn user_config(args: &Value) -> HashMap<String, Value> {
    args.get("config")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

async fn plan_install(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let target = args.get("target").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'target'"))?;
    let service = args.get("service").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'service'"))?;
    let device = resolve_device(ctx, target).await?;
    let plan = ctx.installer.plan(&device, service, &user_config(&args)).await?;
    Ok(ToolOutcome::json(serde_json::to_value(plan).unwrap_or(Value::Null)))
}

async fn install_service(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let target = args.get("target").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'target'"))?;
    let service = args.get("service").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'service'"))?;
    let device = resolve_device(ctx, target).await?;
    let result = ctx
        .installer
        .install(&device, service, &user_config(&args), InstallOptions::default())
        .await?;
    Ok(ToolOutcome::json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

async fn uninstall_service(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    registry::requires_confirmation(SideEffect::Destructive, &args)?;
    let target = args.get("target").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'target'"))?;
    let service = args.get("service").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'service'"))?;
    let device = resolve_device(ctx, target).await?;
    let result = ctx.installer.uninstall(&device, service).await?;
    Ok(ToolOutcome::json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

async fn service_health(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let target = args.get("target").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'target'"))?;
    let service = args.get("service").and_then(Value::as_str).ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'service'"))?;
    let device = resolve_device(ctx, target).await?;
    let report = ctx.installer.health(&device, service).await?;
    Ok(ToolOutcome::json(serde_json::to_value(report).unwrap_or(Value::Null)))
}
