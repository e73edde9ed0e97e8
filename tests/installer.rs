use async_trait::async_trait;
use homelab_mcp::error::{ToolErrorKind, ToolResult};
use homelab_mcp::installer::ServiceInstaller;
use homelab_mcp::ssh::{
    AuthMethod, BootstrapOutcome, CommandOutput, RunOptions, SshExecutor, SshTarget, UploadSource, VerifyOutcome,
};
use homelab_mcp::store::model::{AuthKind, Device, DeviceRole, DeviceUpsert, DiscoveredFacts};
use homelab_mcp::store::DeviceStore;
use homelab_mcp::templates::TemplateStore;
use homelab_mcp::terraform::TerraformDriver;
use std::collections::HashMap;
use std::sync::Arc;

struct UnreachableSsh;

#[async_trait]
impl SshExecutor for UnreachableSsh {
    async fn run(&self, _target: &SshTarget, _auth: &AuthMethod, _command: &str, _options: RunOptions) -> ToolResult<CommandOutput> {
        panic!("plan() must not reach the network");
    }

    async fn upload(&self, _target: &SshTarget, _auth: &AuthMethod, _source: UploadSource, _remote_path: &str, _mode: u32) -> ToolResult<()> {
        panic!("plan() must not reach the network");
    }

    async fn download(&self, _target: &SshTarget, _auth: &AuthMethod, _remote_path: &str) -> ToolResult<Vec<u8>> {
        panic!("plan() must not reach the network");
    }

    async fn bootstrap_admin(
        &self,
        _target: &SshTarget,
        _admin_auth: &AuthMethod,
        _managed_user: &str,
        _force_update_key: bool,
    ) -> ToolResult<BootstrapOutcome> {
        panic!("plan() must not reach the network");
    }

    async fn verify_admin(&self, _target: &SshTarget) -> ToolResult<VerifyOutcome> {
        panic!("plan() must not reach the network");
    }
}

const TEMPLATE_YAML: &str = r#"
name: pihole
version: "1.0.0"
requirements:
  ports: [53, 80]
variables:
  - name: admin_password
    type: password
    required: true
installation:
  method: docker_compose
  compose:
    services:
      pihole:
        image: "pihole/pihole:latest"
        environment:
          WEBPASSWORD: "{{admin_password}}"
"#;

async fn build_installer() -> (ServiceInstaller, tempfile::TempDir, tempfile::TempDir) {
    let template_dir = tempfile::tempdir().expect("template tempdir");
    std::fs::write(template_dir.path().join("pihole.yaml"), TEMPLATE_YAML).expect("write template");
    let templates = Arc::new(TemplateStore::load_dir(template_dir.path()).expect("load templates"));

    let store_dir = tempfile::tempdir().expect("store tempdir");
    let store = Arc::new(
        DeviceStore::open(&store_dir.path().join("devices.db"))
            .await
            .expect("open store"),
    );

    let terraform = Arc::new(TerraformDriver::new(store_dir.path().join("terraform")));
    let installer = ServiceInstaller::new(
        templates,
        store,
        Arc::new(UnreachableSsh),
        terraform,
        store_dir.path().join("deployments"),
    );
    (installer, template_dir, store_dir)
}

fn fixture_device() -> Device {
    Device {
        id: 1,
        hostname: Some("nas.local".to_string()),
        ip_address: Some("10.0.0.5".to_string()),
        username: Some("mcp_admin".to_string()),
        auth_kind: AuthKind::Key,
        credential_ref: None,
        facts: DiscoveredFacts::default(),
        role: DeviceRole::ServiceHost,
        excluded_from_deployments: false,
        notes: None,
        services: Vec::new(),
        created_at: chrono::Utc::now(),
        last_seen_at: None,
        last_discovery_at: None,
        version: 1,
    }
}

#[tokio::test]
async fn plan_reports_missing_required_variables_without_touching_ssh() {
    let (installer, _t, _s) = build_installer().await;
    let device = fixture_device();
    let err = installer
        .plan(&device, "pihole", &HashMap::new())
        .await
        .expect_err("missing admin_password should fail");
    assert_eq!(err.kind, ToolErrorKind::RequirementUnmet);
}

#[tokio::test]
async fn plan_succeeds_and_is_not_a_noop_for_a_device_with_no_prior_install() {
    let (installer, _t, _s) = build_installer().await;
    let device = fixture_device();
    let mut config = HashMap::new();
    config.insert("admin_password".to_string(), serde_json::json!("hunter2"));

    let plan = installer.plan(&device, "pihole", &config).await.expect("plan succeeds");
    assert!(!plan.would_be_noop);
    assert!(!plan.config_digest.is_empty());
}

#[tokio::test]
async fn plan_is_a_noop_when_the_device_already_has_a_healthy_matching_install() {
    let (installer, _t, _s) = build_installer().await;
    let mut device = fixture_device();
    let mut config = HashMap::new();
    config.insert("admin_password".to_string(), serde_json::json!("hunter2"));

    let plan = installer.plan(&device, "pihole", &config).await.expect("plan succeeds");
    device.services.push(homelab_mcp::store::model::InstalledService {
        service_name: "pihole".to_string(),
        version: Some("1.0.0".to_string()),
        method: homelab_mcp::store::model::InstallMethod::DockerCompose,
        ports: vec![53, 80],
        config_digest: plan.config_digest.clone(),
        installed_at: chrono::Utc::now(),
        health: homelab_mcp::store::model::ServiceHealth::Healthy,
        deployment_dir: Some("/srv/pihole".to_string()),
    });

    let plan_again = installer.plan(&device, "pihole", &config).await.expect("plan succeeds");
    assert!(plan_again.would_be_noop);
}

#[tokio::test]
async fn plan_rejects_an_unknown_service_name() {
    let (installer, _t, _s) = build_installer().await;
    let device = fixture_device();
    let err = installer
        .plan(&device, "not-a-real-service", &HashMap::new())
        .await
        .expect_err("unknown service should fail");
    assert_eq!(err.kind, ToolErrorKind::NotFound);
}
