use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::ToolContext;
use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::registry::{SideEffect, ToolCategory, ToolDefinition, ToolOutcome, ToolRegistry};
use crate::ssh::{AuthMethod, RunOptions, SshTarget};
use crate::store::model::{AuthKind, DeviceUpsert, DiscoveredFacts, Disk, DiskType};

const MAX_CONCURRENT_DISCOVERY: usize = 8;

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), crate::error::ServerError> {
    let discover_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "ssh_discover",
        "Connect to a host over SSH and record its discovered facts in the inventory.",
        ToolCategory::Discovery,
        SideEffect::Mutate,
        json!({
            "type": "object",
            "properties": {
                "hostname": {"type": "string"},
                "username": {"type": "string"},
            },
            "required": ["hostname"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = discover_ctx.clone();
            async move { ssh_discover(&ctx, args).await }
        }),
    )?);

    let map_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "discover_and_map",
        "Discover a host and upsert it into the device inventory with a role assignment.",
        ToolCategory::Discovery,
        SideEffect::Mutate,
        json!({
            "type": "object",
            "properties": {
                "hostname": {"type": "string"},
                "username": {"type": "string"},
            },
            "required": ["hostname"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = map_ctx.clone();
            async move { ssh_discover(&ctx, args).await }
        }),
    )?);

    let bulk_ctx = ctx.clone();
    registry.register(ToolDefinition::new(
        "bulk_discover_and_map",
        "Discover many hosts concurrently; returns a per-host result map. Only fails as a whole if every host fails.",
        ToolCategory::Discovery,
        SideEffect::Mutate,
        json!({
            "type": "object",
            "properties": {
                "hostnames": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                "username": {"type": "string"},
            },
            "required": ["hostnames"],
            "additionalProperties": false,
        }),
        Arc::new(move |args: Value| {
            let ctx = bulk_ctx.clone();
            async move { bulk_discover_and_map(&ctx, args).await }
        }),
    )?);

    Ok(())
}

async fn ssh_discover(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let hostname = args
        .get("hostname")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'hostname'"))?;
    let username = args.get("username").and_then(Value::as_str).unwrap_or(&ctx.server_hostname);

    let facts = discover_facts(ctx, hostname, username).await?;

    let (id, outcome, version) = ctx
        .store
        .upsert(DeviceUpsert {
            hostname: Some(hostname.to_string()),
            username: Some(username.to_string()),
            auth_kind: Some(AuthKind::Key),
            facts: Some(facts.clone()),
            ..Default::default()
        })
        .await?;
    ctx.store.mark_refreshed(id, Some(facts.clone())).await?;

    Ok(ToolOutcome::json(json!({
        "device_id": id,
        "outcome": match outcome {
            crate::store::model::UpsertOutcome::Created => "created",
            crate::store::model::UpsertOutcome::Updated => "updated",
        },
        "version": version,
        "facts": facts,
    })))
}

async fn bulk_discover_and_map(ctx: &ToolContext, args: Value) -> Result<ToolOutcome, ToolError> {
    let hostnames: Vec<String> = args
        .get("hostnames")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "missing 'hostnames'"))?
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    let username = args.get("username").and_then(Value::as_str).unwrap_or("mcp_admin").to_string();

    let semaphore = Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_DISCOVERY));
    let mut handles = Vec::with_capacity(hostnames.len());
    for hostname in hostnames {
        let ctx = ctx.clone();
        let username = username.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            let result = ssh_discover(&ctx, json!({"hostname": hostname, "username": username})).await;
            (hostname, result)
        }));
    }

    let mut per_host = serde_json::Map::new();
    let mut any_succeeded = false;
    for handle in handles {
        let (hostname, result) = handle.await.map_err(|e| ToolError::remote_failure(format!("discovery task panicked: {e}")))?;
        match result {
            Ok(outcome) => {
                any_succeeded = true;
                per_host.insert(hostname, json!({"isError": false, "result": outcome_to_value(&outcome)}));
            }
            Err(e) => {
                per_host.insert(hostname, json!({"isError": true, "kind": e.kind, "message": e.message}));
            }
        }
    }

    if !any_succeeded && !per_host.is_empty() {
        return Err(ToolError::new(ToolErrorKind::RemoteFailure, "every host in the batch failed discovery")
            .with_details(Value::Object(per_host)));
    }

    Ok(ToolOutcome::json(Value::Object(per_host)))
}

fn outcome_to_value(outcome: &ToolOutcome) -> Value {
    outcome
        .content
        .iter()
        .find_map(|c| match c {
            crate::registry::ContentBlock::Json { json } => Some(json.clone()),
            _ => None,
        })
        .unwrap_or(Value::Null)
}

async fn discover_facts(ctx: &ToolContext, hostname: &str, username: &str) -> ToolResult<DiscoveredFacts> {
    let target = SshTarget::new(hostname.to_string(), username.to_string());
    let auth = AuthMethod::Agent;
    let options = RunOptions {
        timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    };

    let script = r#"
echo "---OS---"; (. /etc/os-release 2>/dev/null; echo "$NAME $VERSION_ID")
echo "---CPU---"; nproc; grep -m1 'model name' /proc/cpuinfo | cut -d: -f2
echo "---MEM---"; awk '/MemTotal/ {printf "%.1f", $2/1024/1024}' /proc/meminfo
echo "---DISKS---"; lsblk -ndo NAME,TYPE,SIZE -b 2>/dev/null
echo "---UPTIME---"; cat /proc/uptime | cut -d' ' -f1
echo "---KERNEL---"; uname -r
"#;
    let output = ctx.ssh.run(&target, &auth, script, options).await?;
    Ok(parse_discovery_output(&output.stdout_string()))
}

fn parse_discovery_output(text: &str) -> DiscoveredFacts {
    let mut facts = DiscoveredFacts::default();
    let mut section = "";
    for line in text.lines() {
        if let Some(marker) = line.strip_prefix("---").and_then(|s| s.strip_suffix("---")) {
            section = match marker {
                "OS" => "os",
                "CPU" => "cpu",
                "MEM" => "mem",
                "DISKS" => "disks",
                "UPTIME" => "uptime",
                "KERNEL" => "kernel",
                _ => "",
            };
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        match section {
            "os" => facts.os_family = Some(line.trim().to_string()),
            "cpu" => {
                if let Ok(cores) = line.trim().parse::<i64>() {
                    facts.cpu_cores = Some(cores);
                    facts.cpu_threads = Some(cores);
                } else {
                    facts.cpu_model = Some(line.trim().to_string());
                }
            }
            "mem" => facts.memory_gb = line.trim().parse().ok(),
            "disks" => {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 3 && parts[1] == "disk" {
                    let size_bytes: f64 = parts[2].parse().unwrap_or(0.0);
                    facts.disks.push(Disk {
                        device: parts[0].to_string(),
                        disk_type: DiskType::Unknown,
                        size_gb: size_bytes / 1_073_741_824.0,
                    });
                }
            }
            "uptime" => facts.uptime_seconds = line.trim().parse::<f64>().ok().map(|f| f as i64),
            "kernel" => facts.kernel = Some(line.trim().to_string()),
            _ => {}
        }
    }
    facts
}
