use fd_lock::RwLock as FileLock;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{ToolError, ToolErrorKind, ToolResult};

const INIT_SENTINEL: &str = ".mcp-init-ok";
const LOCK_SENTINEL: &str = ".mcp-lock";
const DESTROYED_MARKER: &str = ".destroyed";

#[derive(Debug, Clone)]
pub struct ApplyOutput {
    pub outputs: Value,
    pub stdout_tail: String,
}

/// Holds an exclusive lock on a workdir's sentinel for the lifetime of one
/// Terraform operation. Field order matters: the guard must drop before the
/// boxed `FileLock` it borrows from.
struct WorkdirLock {
    guard: fd_lock::RwLockWriteGuard<'static, File>,
    _owner: Box<FileLock<File>>,
}

#[derive(Debug, Clone)]
pub struct PlanSummary {
    pub add: u32,
    pub change: u32,
    pub destroy: u32,
    pub raw: String,
}

/// Drives the Terraform CLI against a per-service working directory (§4.6).
/// Every operation takes an exclusive file lock on a sentinel inside that
/// directory so concurrent calls for the same `(service, target)` either
/// wait or fail `Busy`, matching the terraform-workdir ordering rule in §5.
pub struct TerraformDriver {
    state_root: PathBuf,
    binary: String,
}

impl TerraformDriver {
    pub fn new(state_root: PathBuf) -> Self {
        Self {
            state_root,
            binary: "terraform".to_string(),
        }
    }

    pub fn working_dir(&self, service_name: &str, target_hostname: &str) -> PathBuf {
        self.state_root.join(format!("{service_name}-{target_hostname}"))
    }

    async fn acquire_lock(&self, workdir: &Path, wait: bool) -> ToolResult<WorkdirLock> {
        let lock_path = workdir.join(LOCK_SENTINEL);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| ToolError::remote_failure(format!("opening lock sentinel: {e}")))?;
        let mut boxed = Box::new(FileLock::new(file));

        // SAFETY: `guard` borrows `*boxed`; both are held in `WorkdirLock`,
        // whose field order drops the guard before the box it points into.
        let lock_ptr: *mut FileLock<File> = boxed.as_mut();
        let acquire = || unsafe { (*lock_ptr).write() };
        let try_acquire = || unsafe { (*lock_ptr).try_write() };

        let guard = if wait {
            tokio::task::block_in_place(acquire)
                .map_err(|e| ToolError::remote_failure(format!("acquiring terraform lock: {e}")))?
        } else {
            match tokio::task::block_in_place(try_acquire) {
                Ok(g) => g,
                Err(_) => return Err(ToolError::busy("terraform working directory is locked by another operation")),
            }
        };
        let guard: fd_lock::RwLockWriteGuard<'static, File> = unsafe { std::mem::transmute(guard) };
        Ok(WorkdirLock { guard, _owner: boxed })
    }

    /// Writes `main.tf` and `terraform.tfvars`, then runs `terraform init`
    /// once per directory, cached by `.mcp-init-ok`.
    pub async fn write_and_init(&self, service_name: &str, target_hostname: &str, main_tf: &str, tfvars: &str, wait: bool) -> ToolResult<()> {
        let workdir = self.working_dir(service_name, target_hostname);
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| ToolError::remote_failure(format!("creating terraform workdir: {e}")))?;
        let _lock = self.acquire_lock(&workdir, wait).await?;

        tokio::fs::write(workdir.join("main.tf"), main_tf)
            .await
            .map_err(|e| ToolError::remote_failure(format!("writing main.tf: {e}")))?;
        tokio::fs::write(workdir.join("terraform.tfvars"), tfvars)
            .await
            .map_err(|e| ToolError::remote_failure(format!("writing terraform.tfvars: {e}")))?;

        if !workdir.join(INIT_SENTINEL).exists() {
            let output = self.run_cli(&workdir, &["init", "-input=false"]).await?;
            tokio::fs::write(workdir.join(INIT_SENTINEL), &output.stdout)
                .await
                .map_err(|e| ToolError::remote_failure(format!("writing init sentinel: {e}")))?;
        }
        Ok(())
    }

    pub async fn plan(&self, service_name: &str, target_hostname: &str, wait: bool) -> ToolResult<PlanSummary> {
        let workdir = self.working_dir(service_name, target_hostname);
        let _lock = self.acquire_lock(&workdir, wait).await?;
        let output = self
            .run_cli(&workdir, &["plan", "-input=false", "-no-color", "-detailed-exitcode"])
            .await?;
        Ok(parse_plan_summary(&String::from_utf8_lossy(&output.stdout)))
    }

    pub async fn apply(&self, service_name: &str, target_hostname: &str, wait: bool) -> ToolResult<ApplyOutput> {
        let workdir = self.working_dir(service_name, target_hostname);
        let _lock = self.acquire_lock(&workdir, wait).await?;
        self.run_cli(&workdir, &["apply", "-input=false", "-auto-approve", "-no-color"])
            .await?;
        let output_result = self.run_cli(&workdir, &["output", "-json"]).await?;
        let outputs: Value = serde_json::from_slice(&output_result.stdout).unwrap_or(Value::Null);
        Ok(ApplyOutput {
            outputs,
            stdout_tail: tail(&output_result.stdout),
        })
    }

    /// Runs `terraform destroy`, then on success deletes the working
    /// directory contents and leaves a `.destroyed` tombstone (§4.6).
    pub async fn destroy(&self, service_name: &str, target_hostname: &str, wait: bool) -> ToolResult<()> {
        let workdir = self.working_dir(service_name, target_hostname);
        if !workdir.exists() {
            return Ok(());
        }
        let _lock = self.acquire_lock(&workdir, wait).await?;
        self.run_cli(&workdir, &["destroy", "-input=false", "-auto-approve", "-no-color"])
            .await?;

        for entry in std::fs::read_dir(&workdir)
            .map_err(|e| ToolError::remote_failure(format!("reading workdir for cleanup: {e}")))?
        {
            let entry = entry.map_err(|e| ToolError::remote_failure(e.to_string()))?;
            let name = entry.file_name();
            if name == DESTROYED_MARKER || name == LOCK_SENTINEL {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(&path);
            } else {
                let _ = std::fs::remove_file(&path);
            }
        }
        std::fs::write(workdir.join(DESTROYED_MARKER), chrono::Utc::now().to_rfc3339())
            .map_err(|e| ToolError::remote_failure(format!("writing tombstone: {e}")))?;
        Ok(())
    }

    async fn run_cli(&self, workdir: &Path, args: &[&str]) -> ToolResult<std::process::Output> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::remote_failure(format!("spawning terraform: {e}")))?;

        let timeout = Duration::from_secs(600);
        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        match result {
            Ok(Ok(output)) if output.status.success() => Ok(output),
            Ok(Ok(output)) => Err(ToolError::new(ToolErrorKind::RemoteFailure, format!("terraform {} failed", args.join(" ")))
                .with_details(serde_json::json!({
                    "exit_code": output.status.code(),
                    "stdout": tail(&output.stdout),
                    "stderr": tail(&output.stderr),
                }))),
            Ok(Err(e)) => Err(ToolError::remote_failure(format!("terraform I/O error: {e}"))),
            Err(_) => Err(ToolError::timeout(format!("terraform {} exceeded {:?}", args.join(" "), timeout))),
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    const MAX: usize = 8192;
    if s.len() <= MAX {
        s.into_owned()
    } else {
        let mut start = s.len() - MAX;
        while !s.is_char_boundary(start) {
            start += 1;
        }
        s[start..].to_string()
    }
}

fn parse_plan_summary(raw: &str) -> PlanSummary {
    let mut add = 0;
    let mut change = 0;
    let mut destroy = 0;
    for line in raw.lines() {
        if let Some(rest) = line.trim().strip_prefix("Plan:") {
            for part in rest.split(',') {
                let part = part.trim();
                if let Some(n) = part.strip_suffix("to add") {
                    add = n.trim().parse().unwrap_or(0);
                } else if let Some(n) = part.strip_suffix("to change") {
                    change = n.trim().parse().unwrap_or(0);
                } else if let Some(n) = part.strip_suffix("to destroy") {
                    destroy = n.trim().parse().unwrap_or(0);
                } else if let Some(n) = part.strip_suffix("to destroy.") {
                    destroy = n.trim().parse().unwrap_or(0);
                }
            }
        }
    }
    PlanSummary { add, change, destroy, raw: raw.to_string() }
}
