pub mod health;
pub mod requirements;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::ssh::{AuthMethod, RunOptions, SshExecutor, SshTarget, UploadSource};
use crate::store::model::{Device, InstallMethod, InstalledService, ServiceHealth};
use crate::store::DeviceStore;
use crate::templates::render::{self, RenderedArtifacts, RenderedKind};
use crate::templates::{digest, Installation, ServiceTemplate, TemplateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Planning,
    RequirementCheck,
    Uploading,
    Executing,
    Verifying,
    Recording,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementWarning {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallPlan {
    pub service_name: String,
    pub would_be_noop: bool,
    pub config_digest: String,
    pub warnings: Vec<RequirementWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub changed: bool,
    pub health: ServiceHealth,
    pub config_digest: String,
    pub deployment_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallResult {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub health: ServiceHealth,
    pub checks: Vec<health::ProbeResult>,
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub rollback_on_unhealthy: bool,
    pub wait: bool,
}

/// Drives a service from template + user config onto a target device through
/// the `Planning → RequirementCheck → Uploading → Executing → Verifying →
/// Recording` state machine (§4.5). Install/uninstall for a given
/// `(device, service_name)` pair is serialized by a per-key mutex so
/// concurrent calls either queue or return `Busy`.
pub struct ServiceInstaller {
    templates: Arc<TemplateStore>,
    store: Arc<DeviceStore>,
    ssh: Arc<dyn SshExecutor>,
    terraform: Arc<crate::terraform::TerraformDriver>,
    deployment_root: PathBuf,
    install_locks: DashMap<(i64, String), Arc<Mutex<()>>>,
}

impl ServiceInstaller {
    pub fn new(
        templates: Arc<TemplateStore>,
        store: Arc<DeviceStore>,
        ssh: Arc<dyn SshExecutor>,
        terraform: Arc<crate::terraform::TerraformDriver>,
        deployment_root: PathBuf,
    ) -> Self {
        Self {
            templates,
            store,
            ssh,
            terraform,
            deployment_root,
            install_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, device_id: i64, service_name: &str) -> Arc<Mutex<()>> {
        self.install_locks
            .entry((device_id, service_name.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn list_services(&self) -> Vec<crate::templates::TemplateSummary> {
        self.templates.list()
    }

    fn template(&self, service_name: &str) -> ToolResult<&ServiceTemplate> {
        self.templates
            .get(service_name)
            .ok_or_else(|| ToolError::not_found(format!("no template named '{service_name}'")))
    }

    pub async fn plan(&self, device: &Device, service_name: &str, user_config: &HashMap<String, Value>) -> ToolResult<InstallPlan> {
        let template = self.template(service_name)?;
        let bindings = render::resolve_bindings(template, user_config);
        let missing = render::missing_required(template, &bindings);
        if !missing.is_empty() {
            return Err(ToolError::new(
                ToolErrorKind::RequirementUnmet,
                format!("missing required variables: {}", missing.join(", ")),
            )
            .with_details(serde_json::json!({"missing_variables": missing})));
        }

        let artifacts = render::render(template, &bindings)?;
        let digest = digest::config_digest(&artifacts);
        let warnings = requirements::check(&template.requirements, device)
            .into_iter()
            .map(|message| RequirementWarning { message })
            .collect();

        let existing = device.services.iter().find(|s| s.service_name == service_name);
        let would_be_noop = existing
            .map(|s| s.config_digest == digest && s.health == ServiceHealth::Healthy)
            .unwrap_or(false);

        Ok(InstallPlan {
            service_name: service_name.to_string(),
            would_be_noop,
            config_digest: digest,
            warnings,
        })
    }

    pub async fn install(
        &self,
        device: &Device,
        service_name: &str,
        user_config: &HashMap<String, Value>,
        options: InstallOptions,
    ) -> ToolResult<InstallResult> {
        let lock = self.lock_for(device.id, service_name);
        let _guard = if options.wait {
            lock.lock().await
        } else {
            match lock.try_lock() {
                Ok(g) => g,
                Err(_) => return Err(ToolError::busy(format!("install already in progress for {service_name}"))),
            }
        };

        let hostname = device
            .hostname
            .clone()
            .or_else(|| device.ip_address.clone())
            .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "device has no hostname or ip_address"))?;
        let target = SshTarget::new(hostname.clone(), "mcp_admin".to_string());

        // Planning
        let template = self.template(service_name)?.clone();
        let bindings = render::resolve_bindings(&template, user_config);
        let missing = render::missing_required(&template, &bindings);
        if !missing.is_empty() {
            return Err(ToolError::new(
                ToolErrorKind::RequirementUnmet,
                format!("missing required variables: {}", missing.join(", ")),
            ));
        }
        let artifacts = render::render(&template, &bindings)?;
        let new_digest = digest::config_digest(&artifacts);

        let existing = device.services.iter().find(|s| s.service_name == service_name).cloned();
        let is_noop = existing
            .as_ref()
            .map(|s| s.config_digest == new_digest && s.health == ServiceHealth::Healthy)
            .unwrap_or(false);
        if is_noop {
            return Ok(InstallResult {
                changed: false,
                health: ServiceHealth::Healthy,
                config_digest: new_digest,
                deployment_dir: existing.and_then(|s| s.deployment_dir),
            });
        }

        // RequirementCheck
        let port_conflicts = requirements::check_ports_free(&self.ssh, &target, &template.requirements).await?;
        if !port_conflicts.is_empty() {
            return Err(ToolError::new(ToolErrorKind::RequirementUnmet, "required ports already bound")
                .with_details(serde_json::json!({"ports": port_conflicts})));
        }
        for warning in requirements::check(&template.requirements, device) {
            tracing::warn!(service = service_name, hostname = %hostname, warning, "requirement mismatch (non-fatal)");
        }

        let deployment_dir = self.deployment_root.join(format!("{service_name}-{hostname}"));

        // Uploading + Executing, per method
        let auth = AuthMethod::Agent;
        match &artifacts.kind {
            RenderedKind::DockerCompose { yaml } => {
                self.run_compose_install(&target, &auth, &deployment_dir, yaml).await?;
            }
            RenderedKind::Ansible { playbook, files } => {
                self.run_ansible_install(&target, &auth, &deployment_dir, playbook, files).await?;
            }
            RenderedKind::Terraform { main_tf, tfvars } => {
                self.run_terraform_install(service_name, &hostname, main_tf, tfvars, options.wait).await?;
            }
        }

        // Verifying
        let health_report = health::poll_health(&template.post_install.health_check, &self.ssh, &target).await;
        let health_result = health_report.overall;
        if health_result != ServiceHealth::Healthy && options.rollback_on_unhealthy {
            let _ = self.uninstall(device, service_name).await;
            return Err(ToolError::new(ToolErrorKind::StateDrift, "install unhealthy, rolled back")
                .with_details(serde_json::json!({"checks": health_report.checks})));
        }

        // Recording
        let record = InstalledService {
            service_name: service_name.to_string(),
            version: Some(template.version.clone()),
            method: install_method(&artifacts),
            ports: template.requirements.ports.clone(),
            config_digest: new_digest.clone(),
            installed_at: chrono::Utc::now(),
            health: health_result,
            deployment_dir: Some(deployment_dir.to_string_lossy().to_string()),
        };
        self.store.record_service(device.id, record).await?;

        Ok(InstallResult {
            changed: true,
            health: health_result,
            config_digest: new_digest,
            deployment_dir: Some(deployment_dir.to_string_lossy().to_string()),
        })
    }

    pub async fn uninstall(&self, device: &Device, service_name: &str) -> ToolResult<UninstallResult> {
        let lock = self.lock_for(device.id, service_name);
        let _guard = lock.lock().await;

        let hostname = device
            .hostname
            .clone()
            .or_else(|| device.ip_address.clone())
            .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "device has no hostname or ip_address"))?;
        let target = SshTarget::new(hostname.clone(), "mcp_admin".to_string());
        let auth = AuthMethod::Agent;

        let record = device.services.iter().find(|s| s.service_name == service_name);
        let deployment_dir = record.and_then(|r| r.deployment_dir.clone());

        let uninstall_result = match record.map(|r| r.method) {
            Some(InstallMethod::DockerCompose) => {
                if let Some(dir) = &deployment_dir {
                    self.ssh
                        .run(&target, &auth, &format!("cd {dir} && docker compose down -v"), RunOptions::default())
                        .await
                } else {
                    Ok(Default::default())
                }
            }
            Some(InstallMethod::Terraform) => {
                self.terraform.destroy(service_name, &hostname, true).await.map(|_| Default::default())
            }
            Some(InstallMethod::Ansible) => {
                if let Some(dir) = &deployment_dir {
                    self.ssh
                        .run(&target, &auth, &format!("ansible-playbook -i localhost, --tags uninstall {dir}/playbook.yaml"), RunOptions::default())
                        .await
                } else {
                    Ok(Default::default())
                }
            }
            _ => Ok(Default::default()),
        };

        if let Err(e) = &uninstall_result {
            tracing::warn!(service = service_name, error = %e.message, "uninstall command failed, removing record anyway");
        }

        self.store.forget_service(device.id, service_name).await?;
        Ok(UninstallResult { removed: true })
    }

    pub async fn health(&self, device: &Device, service_name: &str) -> ToolResult<HealthReport> {
        let template = self.template(service_name)?;
        let hostname = device
            .hostname
            .clone()
            .or_else(|| device.ip_address.clone())
            .ok_or_else(|| ToolError::new(ToolErrorKind::RequirementUnmet, "device has no hostname or ip_address"))?;
        let target = SshTarget::new(hostname, "mcp_admin".to_string());
        let report = health::poll_health(&template.post_install.health_check, &self.ssh, &target).await;
        Ok(HealthReport {
            health: report.overall,
            checks: report.checks,
        })
    }

    async fn run_compose_install(
        &self,
        target: &SshTarget,
        auth: &AuthMethod,
        deployment_dir: &std::path::Path,
        yaml: &str,
    ) -> ToolResult<()> {
        let remote_dir = deployment_dir.to_string_lossy().to_string();
        self.ssh
            .run(target, auth, &format!("mkdir -p {remote_dir}"), RunOptions::default())
            .await?;
        self.ssh
            .upload(
                target,
                auth,
                UploadSource::Bytes(yaml.as_bytes().to_vec()),
                &format!("{remote_dir}/docker-compose.yaml"),
                0o644,
            )
            .await?;
        self.ssh
            .run(target, auth, &format!("cd {remote_dir} && docker compose pull"), RunOptions { timeout: Some(std::time::Duration::from_secs(600)), ..Default::default() })
            .await?;
        let up = self
            .ssh
            .run(target, auth, &format!("cd {remote_dir} && docker compose up -d"), RunOptions { timeout: Some(std::time::Duration::from_secs(300)), ..Default::default() })
            .await?;
        if up.exit_code != 0 {
            return Err(ToolError::remote_failure("docker compose up failed")
                .with_details(serde_json::json!({"stderr": up.stderr_string()})));
        }
        Ok(())
    }

    async fn run_ansible_install(
        &self,
        target: &SshTarget,
        auth: &AuthMethod,
        deployment_dir: &std::path::Path,
        playbook: &str,
        files: &HashMap<String, String>,
    ) -> ToolResult<()> {
        let remote_dir = deployment_dir.to_string_lossy().to_string();
        self.ssh
            .run(target, auth, &format!("mkdir -p {remote_dir}"), RunOptions::default())
            .await?;
        self.ssh
            .upload(target, auth, UploadSource::Bytes(playbook.as_bytes().to_vec()), &format!("{remote_dir}/playbook.yaml"), 0o644)
            .await?;
        for (path, body) in files {
            self.ssh
                .upload(target, auth, UploadSource::Bytes(body.as_bytes().to_vec()), &format!("{remote_dir}/{path}"), 0o644)
                .await?;
        }
        let inventory = format!("{}, ", target.host);
        let cmd = format!("ansible-playbook -i '{inventory}' {remote_dir}/playbook.yaml");
        let run = self
            .ssh
            .run(target, auth, &cmd, RunOptions { timeout: Some(std::time::Duration::from_secs(1800)), ..Default::default() })
            .await?;
        if run.exit_code != 0 {
            return Err(ToolError::remote_failure("ansible-playbook failed")
                .with_details(serde_json::json!({"stderr": run.stderr_string()})));
        }
        Ok(())
    }

    async fn run_terraform_install(&self, service_name: &str, hostname: &str, main_tf: &str, tfvars: &str, wait: bool) -> ToolResult<()> {
        self.terraform.write_and_init(service_name, hostname, main_tf, tfvars, wait).await?;
        self.terraform.apply(service_name, hostname, wait).await?;
        Ok(())
    }
}

fn install_method(artifacts: &RenderedArtifacts) -> InstallMethod {
    match &artifacts.kind {
        RenderedKind::DockerCompose { .. } => InstallMethod::DockerCompose,
        RenderedKind::Ansible { .. } => InstallMethod::Ansible,
        RenderedKind::Terraform { .. } => InstallMethod::Terraform,
    }
}
