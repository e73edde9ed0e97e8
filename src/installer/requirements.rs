use std::sync::Arc;

use crate::error::ToolResult;
use crate::ssh::{AuthMethod, RunOptions, SshExecutor, SshTarget};
use crate::store::model::Device;
use crate::templates::Requirements;

/// Checks declared requirements against the target's last-known facts
/// (§4.5). Only hardware-hint mismatches marked `required: true` are
/// returned by `check` as hard failures would be — this function reports
/// every mismatch as a warning string; callers decide what's fatal.
pub fn check(requirements: &Requirements, device: &Device) -> Vec<String> {
    let mut warnings = Vec::new();
    let facts = &device.facts;

    if let Some(needed) = requirements.memory_gb {
        match facts.memory_gb {
            Some(have) if have < needed => {
                warnings.push(format!("memory: need {needed} GB, device has {have} GB"));
            }
            None => warnings.push("memory: device facts unknown (discovery required)".to_string()),
            _ => {}
        }
    }

    if let Some(needed) = requirements.cpu_cores {
        match facts.cpu_cores {
            Some(have) if (have as u32) < needed => {
                warnings.push(format!("cpu_cores: need {needed}, device has {have}"));
            }
            None => warnings.push("cpu_cores: device facts unknown (discovery required)".to_string()),
            _ => {}
        }
    }

    if let Some(needed) = requirements.disk_gb {
        let total: f64 = facts.disks.iter().map(|d| d.size_gb).sum();
        if facts.disks.is_empty() {
            warnings.push("disk_gb: device facts unknown (discovery required)".to_string());
        } else if total < needed {
            warnings.push(format!("disk_gb: need {needed} GB, device has {total} GB total"));
        }
    }

    let known_tags: std::collections::HashSet<&str> = facts
        .gpus
        .iter()
        .flat_map(|g| g.capability_tags.iter().map(String::as_str))
        .chain(facts.pci_devices.iter().map(String::as_str))
        .collect();
    for hint in &requirements.hardware_hints {
        if !known_tags.contains(hint.tag.as_str()) {
            warnings.push(format!("hardware hint '{}' not found among discovered devices", hint.tag));
        }
    }

    for dep in &requirements.dependencies {
        if !known_tags.contains(dep.as_str()) {
            // Dependencies are service names/binaries, not hardware tags;
            // absence is reported but never blocks planning by itself.
            warnings.push(format!("dependency '{dep}' presence unverified"));
        }
    }

    warnings
}

/// Live port check against the target, run just before `Uploading` —
/// requirement warnings above are based on stale facts, but port binding
/// is checked freshly since it changes moment-to-moment.
pub async fn check_ports_free(ssh: &Arc<dyn SshExecutor>, target: &SshTarget, requirements: &Requirements) -> ToolResult<Vec<u16>> {
    if requirements.ports.is_empty() {
        return Ok(Vec::new());
    }
    let ports_arg = requirements
        .ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let cmd = format!(
        "for p in {ports_arg}; do ss -ltn \"( sport = :$p )\" | tail -n +2 | grep -q . && echo $p; done"
    );
    let output = ssh.run(target, &AuthMethod::Agent, &cmd, RunOptions::default()).await?;
    let bound: Vec<u16> = output
        .stdout_string()
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect();
    Ok(bound)
}
