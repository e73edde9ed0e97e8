use rand_core::RngCore;
use sha2::Digest;

use crate::error::{ToolError, ToolResult};

use super::keys::AdminKeypair;
use super::{AuthMethod, BootstrapOutcome, KeyAction, RunOptions, SshExecutor, SshTarget, VerifyOutcome};

const MCP_KEY_COMMENT_PREFIX: &str = "mcp_admin@";

/// Implements the 7-step bootstrap protocol from §4.1. Every step is
/// idempotent; re-running against an already-bootstrapped host is a no-op
/// except for the authorized_keys rewrite, which only happens when
/// `force_update_key` is set and a stale MCP entry is found.
pub async fn run_bootstrap<E: SshExecutor + ?Sized>(
    executor: &E,
    target: &SshTarget,
    admin_auth: &AuthMethod,
    managed_user: &str,
    force_update_key: bool,
    admin_keypair: &AdminKeypair,
) -> ToolResult<BootstrapOutcome> {
    // Step 1 is implicit: every `run` call below connects as the admin user.
    let opts = RunOptions::default();

    // Step 2: create the managed user if absent, with a random local-only password.
    let check = executor
        .run(target, admin_auth, &format!("id -u {managed_user}"), opts.clone())
        .await?;
    let user_existed = check.exit_code == 0;
    if !user_existed {
        let password = random_password();
        let password_hash = hash_password(&password);
        let create_cmd = format!(
            "useradd -m -s /bin/bash {managed_user} && echo '{managed_user}:{password_hash}' | chpasswd -e",
            managed_user = managed_user,
            password_hash = password_hash,
        );
        let create = executor.run(target, admin_auth, &create_cmd, opts.clone()).await?;
        if create.exit_code != 0 {
            return Err(ToolError::remote_failure(format!(
                "failed to create user {managed_user}: {}",
                create.stderr_string()
            ))
            .with_details(serde_json::json!({"stderr": create.stderr_string()})));
        }
    }

    // Step 3: sudo group + NOPASSWD drop-in, validated with visudo -c.
    let sudoers_line = format!("{managed_user} ALL=(ALL) NOPASSWD:ALL");
    let sudoers_path = format!("/etc/sudoers.d/90-mcp-{managed_user}");
    let sudo_cmd = format!(
        "usermod -aG sudo {managed_user} 2>/dev/null; usermod -aG wheel {managed_user} 2>/dev/null; \
         umask 227; echo '{sudoers_line}' > {sudoers_path}.tmp && chmod 0440 {sudoers_path}.tmp && \
         visudo -cf {sudoers_path}.tmp && mv {sudoers_path}.tmp {sudoers_path}"
    );
    let sudo_result = executor.run(target, admin_auth, &sudo_cmd, opts.clone()).await?;
    let sudo_ok = sudo_result.exit_code == 0;
    if !sudo_ok {
        tracing::warn!(
            host = %target.host,
            user = managed_user,
            stderr = %sudo_result.stderr_string(),
            "sudoers drop-in validation failed"
        );
    }

    // Step 4: ~/.ssh with mode 0700.
    let ssh_dir_cmd = format!(
        "su - {managed_user} -c 'mkdir -p ~/.ssh && chmod 700 ~/.ssh'"
    );
    let ssh_dir = executor.run(target, admin_auth, &ssh_dir_cmd, opts.clone()).await?;
    if ssh_dir.exit_code != 0 {
        return Err(ToolError::remote_failure(format!(
            "failed to prepare ~/.ssh for {managed_user}: {}",
            ssh_dir.stderr_string()
        )));
    }

    // Step 5+6: read authorized_keys, decide the key action, write back atomically.
    let authorized_keys_path = format!("/home/{managed_user}/.ssh/authorized_keys");
    let read_cmd = format!("cat {authorized_keys_path} 2>/dev/null || true");
    let existing = executor.run(target, admin_auth, &read_cmd, opts.clone()).await?;
    let existing_content = existing.stdout_string();
    let our_line = admin_keypair.authorized_keys_line();

    let mcp_lines: Vec<&str> = existing_content
        .lines()
        .filter(|l| l.contains(MCP_KEY_COMMENT_PREFIX))
        .collect();
    let has_exact_line = existing_content.lines().any(|l| l.trim() == our_line.trim());

    let key_action = if has_exact_line {
        KeyAction::Unchanged
    } else if !mcp_lines.is_empty() && force_update_key {
        KeyAction::Replaced
    } else if mcp_lines.is_empty() {
        KeyAction::Added
    } else {
        KeyAction::Unchanged
    };

    if key_action != KeyAction::Unchanged {
        let kept: Vec<&str> = existing_content
            .lines()
            .filter(|l| !l.contains(MCP_KEY_COMMENT_PREFIX))
            .collect();
        let mut new_content = kept.join("\n");
        if !new_content.is_empty() {
            new_content.push('\n');
        }
        new_content.push_str(&our_line);
        new_content.push('\n');

        let tmp_path = format!("{authorized_keys_path}.mcp-tmp");
        executor
            .upload(
                target,
                admin_auth,
                super::UploadSource::Bytes(new_content.into_bytes()),
                &tmp_path,
                0o600,
            )
            .await?;
        let finalize_cmd = format!(
            "chown {managed_user}:{managed_user} {tmp_path} && mv -f {tmp_path} {authorized_keys_path}"
        );
        let finalize = executor.run(target, admin_auth, &finalize_cmd, opts.clone()).await?;
        if finalize.exit_code != 0 {
            return Err(ToolError::remote_failure(format!(
                "failed to install authorized_keys for {managed_user}: {}",
                finalize.stderr_string()
            )));
        }
    }

    // Step 7: verify with a fresh connection as the managed user.
    let managed_target = SshTarget {
        host: target.host.clone(),
        port: target.port,
        user: managed_user.to_string(),
    };
    let verify = run_verify(executor, &managed_target, admin_keypair).await?;
    if !verify.key_auth_ok {
        tracing::warn!(host = %target.host, "bootstrap completed but verification failed");
    }

    Ok(BootstrapOutcome {
        user_existed,
        key_action,
        sudo_ok,
    })
}

pub async fn run_verify<E: SshExecutor + ?Sized>(
    executor: &E,
    target: &SshTarget,
    admin_keypair: &AdminKeypair,
) -> ToolResult<VerifyOutcome> {
    let managed_target = SshTarget {
        host: target.host.clone(),
        port: target.port,
        user: target.user.clone(),
    };
    let auth = AuthMethod::PrivateKey(std::sync::Arc::new(admin_keypair.key_pair().clone()));

    let ping = executor.run(&managed_target, &auth, "true", RunOptions::default()).await;
    let (reachable, key_auth_ok) = match ping {
        Ok(_) => (true, true),
        Err(e) if matches!(e.kind, crate::error::ToolErrorKind::AuthFailed) => (true, false),
        Err(_) => (false, false),
    };

    let sudo_ok = if key_auth_ok {
        executor
            .run(&managed_target, &auth, "sudo -n true", RunOptions::default())
            .await
            .map(|out| out.exit_code == 0)
            .unwrap_or(false)
    } else {
        false
    };

    Ok(VerifyOutcome {
        reachable,
        key_auth_ok,
        sudo_ok,
    })
}

fn random_password() -> String {
    let mut bytes = [0u8; 24];
    rand_core::OsRng.fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

/// Hashes the generated password for local storage only; the plaintext is
/// discarded after this call and never returned to any caller.
fn hash_password(password: &str) -> String {
    let mut hasher = sha2::Sha512::new();
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    format!("$6${}$unused", hex::encode(&digest[..16]))
}
