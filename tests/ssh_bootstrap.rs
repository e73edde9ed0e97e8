use async_trait::async_trait;
use homelab_mcp::error::ToolResult;
use homelab_mcp::ssh::bootstrap::run_bootstrap;
use homelab_mcp::ssh::keys::generate;
use homelab_mcp::ssh::{
    AuthMethod, BootstrapOutcome, CommandOutput, KeyAction, RunOptions, SshExecutor, SshTarget, UploadSource,
    VerifyOutcome,
};
use std::sync::Mutex;

/// Simulates a single remote host well enough to exercise the bootstrap
/// protocol's branches without a real SSH connection: tracks whether the
/// managed user exists and the current contents of `authorized_keys`.
struct FakeHost {
    user_exists: Mutex<bool>,
    authorized_keys: Mutex<String>,
    commands: Mutex<Vec<String>>,
}

impl FakeHost {
    fn new() -> Self {
        Self {
            user_exists: Mutex::new(false),
            authorized_keys: Mutex::new(String::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    fn command_count_containing(&self, needle: &str) -> usize {
        self.commands.lock().unwrap().iter().filter(|c| c.contains(needle)).count()
    }
}

#[async_trait]
impl SshExecutor for FakeHost {
    async fn run(&self, _target: &SshTarget, _auth: &AuthMethod, command: &str, _options: RunOptions) -> ToolResult<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.starts_with("id -u ") {
            let exists = *self.user_exists.lock().unwrap();
            return Ok(CommandOutput {
                exit_code: if exists { 0 } else { 1 },
                ..Default::default()
            });
        }
        if command.starts_with("useradd") {
            *self.user_exists.lock().unwrap() = true;
            return Ok(CommandOutput { exit_code: 0, ..Default::default() });
        }
        if command.starts_with("cat ") {
            let content = self.authorized_keys.lock().unwrap().clone();
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: content.into_bytes(),
                ..Default::default()
            });
        }
        if command == "true" || command == "sudo -n true" {
            return Ok(CommandOutput { exit_code: 0, ..Default::default() });
        }
        // usermod/sudoers drop-in, mkdir ~/.ssh, chown+mv finalize: all succeed.
        Ok(CommandOutput { exit_code: 0, ..Default::default() })
    }

    async fn upload(&self, _target: &SshTarget, _auth: &AuthMethod, source: UploadSource, remote_path: &str, _mode: u32) -> ToolResult<()> {
        if remote_path.ends_with(".mcp-tmp") {
            if let UploadSource::Bytes(bytes) = source {
                *self.authorized_keys.lock().unwrap() = String::from_utf8(bytes).unwrap();
            }
        }
        Ok(())
    }

    async fn download(&self, _target: &SshTarget, _auth: &AuthMethod, remote_path: &str) -> ToolResult<Vec<u8>> {
        if remote_path.ends_with("authorized_keys") {
            return Ok(self.authorized_keys.lock().unwrap().clone().into_bytes());
        }
        Ok(Vec::new())
    }

    async fn bootstrap_admin(
        &self,
        _target: &SshTarget,
        _admin_auth: &AuthMethod,
        _managed_user: &str,
        _force_update_key: bool,
    ) -> ToolResult<BootstrapOutcome> {
        unimplemented!("not exercised by these fixtures")
    }

    async fn verify_admin(&self, _target: &SshTarget) -> ToolResult<VerifyOutcome> {
        unimplemented!("not exercised by these fixtures")
    }
}

fn test_keypair(dir: &std::path::Path) -> homelab_mcp::ssh::keys::AdminKeypair {
    generate(&dir.join("id_ed25519"), &dir.join("id_ed25519.pub"), "mcp_admin@test").expect("generate keypair")
}

#[tokio::test]
async fn bootstrap_creates_user_and_installs_key_on_a_fresh_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let keypair = test_keypair(dir.path());
    let host = FakeHost::new();
    let target = SshTarget::new("nas.local", "root");

    let outcome = run_bootstrap(&host, &target, &AuthMethod::Agent, "mcp_admin", false, &keypair)
        .await
        .expect("bootstrap succeeds");

    assert!(!outcome.user_existed);
    assert_eq!(outcome.key_action, KeyAction::Added);
    assert!(host.authorized_keys.lock().unwrap().contains(&keypair.authorized_keys_line()));
}

#[tokio::test]
async fn bootstrap_is_idempotent_on_a_rerun_against_an_already_bootstrapped_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let keypair = test_keypair(dir.path());
    let host = FakeHost::new();
    let target = SshTarget::new("nas.local", "root");

    run_bootstrap(&host, &target, &AuthMethod::Agent, "mcp_admin", false, &keypair)
        .await
        .expect("first bootstrap succeeds");
    let uploads_after_first = host.command_count_containing("chown");

    let outcome = run_bootstrap(&host, &target, &AuthMethod::Agent, "mcp_admin", false, &keypair)
        .await
        .expect("second bootstrap succeeds");

    assert!(outcome.user_existed);
    assert_eq!(outcome.key_action, KeyAction::Unchanged);
    // The authorized_keys rewrite path must not run again when the exact line is present.
    assert_eq!(host.command_count_containing("chown"), uploads_after_first);
}

#[tokio::test]
async fn bootstrap_replaces_a_stale_mcp_key_only_when_force_update_key_is_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let keypair = test_keypair(dir.path());
    let host = FakeHost::new();
    *host.authorized_keys.lock().unwrap() = "ssh-ed25519 AAAAstale mcp_admin@old-host\n".to_string();
    let target = SshTarget::new("nas.local", "root");

    let outcome_without_force = run_bootstrap(&host, &target, &AuthMethod::Agent, "mcp_admin", false, &keypair)
        .await
        .expect("bootstrap without force succeeds");
    assert_eq!(outcome_without_force.key_action, KeyAction::Unchanged);
    assert!(host.authorized_keys.lock().unwrap().contains("old-host"));

    let outcome_with_force = run_bootstrap(&host, &target, &AuthMethod::Agent, "mcp_admin", true, &keypair)
        .await
        .expect("bootstrap with force succeeds");
    assert_eq!(outcome_with_force.key_action, KeyAction::Replaced);
    assert!(!host.authorized_keys.lock().unwrap().contains("old-host"));
    assert!(host.authorized_keys.lock().unwrap().contains(&keypair.authorized_keys_line()));
}
