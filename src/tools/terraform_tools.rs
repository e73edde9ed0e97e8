use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::ToolContext;
use crate::error::{ToolError, ToolErrorKind};
use crate::installer::InstallOptions;
use crate::registry::{SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};
use crate::store::model::InstallMethod;

/// VM lifecycle tools (§4.3's `vm_lifecycle` category) are a thin layer over
/// the Service Installer restricted to `terraform`-method templates — §4.5
/// already says terraform installs delegate to the Terraform Driver, so a
/// "VM" here is just a service whose template declares `method: terraform`.
pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), crate::error::ServerError> {
    let deploy_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "deploy_vm",
        "Provision a VM via a terraform-method service template, onto a target hypervisor host.",
        ToolCategory::VmLifecycle,
        SideEffect::Mutate,
        json!({
            "type": "object",
            "properties": {
                "target": {"type": "string", "description": "hypervisor host: hostname or ip_address"},
                "template": {"type": "string", "description": "terraform-method service template name"},
                "config": {"type": "object"},
            },
            "required": ["target", "template"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = deploy_ctx.clone();
            async move { deploy_vm(&ctx, args).await }
        }),
    )?);

    let list_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "list_vms",
        "List every installed service whose template method is terraform, across all devices.",
        ToolCategory::VmLifecycle,
        SideEffect::Read,
        json!({"type": "object", "properties": {}, "additionalProperties": false}),
        Arc::new(move |_args: Value| {
            let ctx = list_ctx.clone();
            async move { list_vms(&ctx).await }
        }),
    )?);

    Ok(())
}

async fn deploy_vm(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let target = args
        .get("target")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'target'"))?;
    let template_name = args
        .get("template")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'template'"))?;

    let device = match ctx.store.get_by_hostname(target).await? {
        Some(d) => d,
        None => ctx
            .store
            .get_by_ip(target)
            .await?
            .ok_or_else(|| ToolError::not_found(format!("no device matching '{target}'")))?,
    };

    let config: HashMap<String, Value> = args
        .get("config")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let result = ctx
        .installer
        .install(&device, template_name, &config, InstallOptions { wait: true, ..Default::default() })
        .await?;
    Ok(ToolOutcome::json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

async fn list_vms(ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
    let devices = ctx.store.list(&crate::store::model::DeviceFilter::default()).await?;
    let vms: Vec<Value> = devices
        .iter()
        .flat_map(|d| {
            d.services
                .iter()
                .filter(|s| s.method == InstallMethod::Terraform)
                .map(move |s| {
                    json!({
                        "device_id": d.id,
                        "hostname": d.hostname,
                        "service_name": s.service_name,
                        "health": s.health,
                        "deployment_dir": s.deployment_dir,
                        "installed_at": s.installed_at,
                    })
                })
        })
        .collect();
    Ok(ToolOutcome::json(json!({"vms": vms})))
}
