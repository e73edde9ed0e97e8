pub mod bootstrap;
pub mod client;
pub mod keys;
pub mod pool;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::KeyPair;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use crate::config::HostKeyPolicy;
use crate::error::{ToolError, ToolErrorKind, ToolResult};
use client::AdminHandler;
use keys::AdminKeypair;
use pool::{ConnectionKey, ConnectionPool};

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
        }
    }

    fn key(&self) -> ConnectionKey {
        ConnectionKey {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
        }
    }
}

#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    PrivateKey(Arc<KeyPair>),
    Agent,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub stdin: Option<Vec<u8>>,
    pub env: Vec<(String, String)>,
    pub as_user: Option<String>,
    pub use_sudo: bool,
    pub pty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Truncates captured output to the 8 KiB tail per §7's error
    /// propagation policy, for embedding in a `ToolError`'s `details`.
    pub fn tail(bytes: &[u8], max: usize) -> String {
        let s = String::from_utf8_lossy(bytes);
        if s.len() <= max {
            s.into_owned()
        } else {
            let mut start = s.len() - max;
            while !s.is_char_boundary(start) {
                start += 1;
            }
            s[start..].to_string()
        }
    }
}

pub enum UploadSource {
    Bytes(Vec<u8>),
    LocalPath(std::path::PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Added,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BootstrapOutcome {
    pub user_existed: bool,
    pub key_action: KeyAction,
    pub sudo_ok: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyOutcome {
    pub reachable: bool,
    pub key_auth_ok: bool,
    pub sudo_ok: bool,
}

/// Executes shell commands and transfers files over SSH; bootstraps the
/// managed admin user onto new hosts (C1, §4.1).
#[async_trait]
pub trait SshExecutor: Send + Sync {
    async fn run(
        &self,
        target: &SshTarget,
        auth: &AuthMethod,
        command: &str,
        options: RunOptions,
    ) -> ToolResult<CommandOutput>;

    async fn upload(
        &self,
        target: &SshTarget,
        auth: &AuthMethod,
        source: UploadSource,
        remote_path: &str,
        mode: u32,
    ) -> ToolResult<()>;

    async fn download(&self, target: &SshTarget, auth: &AuthMethod, remote_path: &str) -> ToolResult<Vec<u8>>;

    async fn bootstrap_admin(
        &self,
        target: &SshTarget,
        admin_auth: &AuthMethod,
        managed_user: &str,
        force_update_key: bool,
    ) -> ToolResult<BootstrapOutcome>;

    async fn verify_admin(&self, target: &SshTarget) -> ToolResult<VerifyOutcome>;
}

pub struct RusshExecutor {
    pool: ConnectionPool,
    host_key_policy: HostKeyPolicy,
    admin_keypair: AdminKeypair,
    known_keys: Arc<StdMutex<HashSet<String>>>,
    default_timeout: Duration,
}

impl RusshExecutor {
    pub fn new(host_key_policy: HostKeyPolicy, admin_keypair: AdminKeypair) -> Self {
        Self {
            pool: ConnectionPool::new(Duration::from_secs(300)),
            host_key_policy,
            admin_keypair,
            known_keys: Arc::new(StdMutex::new(HashSet::new())),
            default_timeout: Duration::from_secs(60),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn admin_keypair(&self) -> &AdminKeypair {
        &self.admin_keypair
    }

    async fn connect(&self, target: &SshTarget, auth: &AuthMethod) -> ToolResult<Arc<russh::client::Handle<AdminHandler>>> {
        let key = target.key();
        let policy = self.host_key_policy;
        let known_keys = self.known_keys.clone();
        let auth = auth.clone();
        let admin_key_pair = Arc::new(self.admin_keypair.key_pair().clone());
        self.pool
            .get_or_connect(&key, &auth, move |ck, auth| {
                let known_keys = known_keys.clone();
                let admin_key_pair = admin_key_pair.clone();
                async move {
                    let config = Arc::new(russh::client::Config::default());
                    let handler = AdminHandler::new(policy, ck.host.clone(), known_keys);
                    let mut handle =
                        russh::client::connect(config, (ck.host.as_str(), ck.port), handler).await?;
                    let ok = match &auth {
                        AuthMethod::Password(pw) => handle.authenticate_password(&ck.user, pw).await?,
                        AuthMethod::PrivateKey(kp) => handle.authenticate_publickey(&ck.user, kp.clone()).await?,
                        // §4.1: connecting as the designated admin user uses the
                        // server's own keypair without prompting for credentials.
                        AuthMethod::Agent => handle.authenticate_publickey(&ck.user, admin_key_pair.clone()).await?,
                    };
                    if !ok {
                        return Err(russh::Error::NotAuthenticated);
                    }
                    Ok(handle)
                }
            })
            .await
            .map_err(|e| classify_connect_error(&target.host, e))
    }

    fn wrap_command(&self, command: &str, options: &RunOptions) -> String {
        let mut cmd = command.to_string();
        if !options.env.is_empty() {
            let env_prefix = options
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
                .collect::<Vec<_>>()
                .join(" ");
            cmd = format!("{env_prefix} {cmd}");
        }
        if options.use_sudo || options.as_user.is_some() {
            let user = options.as_user.as_deref().unwrap_or("root");
            cmd = format!("sudo -n -u {user} -- bash -lc {}", shell_quote(&cmd));
        }
        cmd
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn classify_connect_error(host: &str, err: russh::Error) -> ToolError {
    match err {
        russh::Error::NotAuthenticated => ToolError::auth_failed(format!("authentication failed for {host}")),
        other => ToolError::unreachable(format!("could not reach {host}: {other}")),
    }
}

#[async_trait]
impl SshExecutor for RusshExecutor {
    async fn run(
        &self,
        target: &SshTarget,
        auth: &AuthMethod,
        command: &str,
        options: RunOptions,
    ) -> ToolResult<CommandOutput> {
        let handle = self.connect(target, auth).await?;
        let wrapped = self.wrap_command(command, &options);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();

        let run_fut = async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(|e| ToolError::unreachable(format!("channel open failed: {e}")))?;
            if options.pty {
                channel
                    .request_pty(false, "xterm", 80, 24, 0, 0, &[])
                    .await
                    .map_err(|e| ToolError::unreachable(format!("pty request failed: {e}")))?;
            }
            channel
                .exec(true, wrapped.as_bytes())
                .await
                .map_err(|e| ToolError::unreachable(format!("exec failed: {e}")))?;
            if let Some(stdin) = &options.stdin {
                channel
                    .data(&stdin[..])
                    .await
                    .map_err(|e| ToolError::unreachable(format!("stdin write failed: {e}")))?;
                channel
                    .eof()
                    .await
                    .map_err(|e| ToolError::unreachable(format!("stdin eof failed: {e}")))?;
            }

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = -1;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                    ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                    ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                    ChannelMsg::Close | ChannelMsg::Eof => break,
                    _ => {}
                }
            }
            Ok::<_, ToolError>((stdout, stderr, exit_code))
        };

        let result = tokio::time::timeout(timeout, run_fut).await;
        let duration = started.elapsed();
        match result {
            Ok(Ok((stdout, stderr, exit_code))) => {
                if exit_code != 0 {
                    tracing::warn!(host = %target.host, exit_code, "remote command exited non-zero");
                }
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code,
                    duration,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "timeout", "en")
                    .await;
                self.pool.evict(&target.key()).await;
                Err(ToolError::timeout(format!(
                    "command on {} exceeded {:?}",
                    target.host, timeout
                )))
            }
        }
    }

    async fn upload(
        &self,
        target: &SshTarget,
        auth: &AuthMethod,
        source: UploadSource,
        remote_path: &str,
        mode: u32,
    ) -> ToolResult<()> {
        let bytes = match source {
            UploadSource::Bytes(b) => b,
            UploadSource::LocalPath(p) => tokio::fs::read(&p)
                .await
                .map_err(|e| ToolError::new(ToolErrorKind::RemoteFailure, format!("reading {}: {e}", p.display())))?,
        };
        let handle = self.connect(target, auth).await?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ToolError::unreachable(format!("channel open failed: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ToolError::unreachable(format!("sftp subsystem failed: {e}")))?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ToolError::unreachable(format!("sftp handshake failed: {e}")))?;

        if let Some(parent) = std::path::Path::new(remote_path).parent() {
            let _ = sftp.create_dir(parent.to_string_lossy()).await;
        }
        let mut file = sftp
            .create(remote_path)
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::RemoteFailure, format!("sftp create: {e}")))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::RemoteFailure, format!("sftp write: {e}")))?;
        file.shutdown()
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::RemoteFailure, format!("sftp close: {e}")))?;
        drop(file);
        let _ = sftp.set_metadata(
            remote_path,
            russh_sftp::protocol::FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            },
        ).await;
        Ok(())
    }

    async fn download(&self, target: &SshTarget, auth: &AuthMethod, remote_path: &str) -> ToolResult<Vec<u8>> {
        let handle = self.connect(target, auth).await?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ToolError::unreachable(format!("channel open failed: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ToolError::unreachable(format!("sftp subsystem failed: {e}")))?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ToolError::unreachable(format!("sftp handshake failed: {e}")))?;
        let bytes = sftp
            .read(remote_path)
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::NotFound, format!("sftp read {remote_path}: {e}")))?;
        Ok(bytes)
    }

    async fn bootstrap_admin(
        &self,
        target: &SshTarget,
        admin_auth: &AuthMethod,
        managed_user: &str,
        force_update_key: bool,
    ) -> ToolResult<BootstrapOutcome> {
        bootstrap::run_bootstrap(self, target, admin_auth, managed_user, force_update_key, &self.admin_keypair).await
    }

    async fn verify_admin(&self, target: &SshTarget) -> ToolResult<VerifyOutcome> {
        bootstrap::run_verify(self, target, &self.admin_keypair).await
    }
}
