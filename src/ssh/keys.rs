use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ServerError;

/// Wraps the server's private key so it can never accidentally end up in a
/// log line or an RPC response: `Debug` is redacted on purpose (§8 "private
/// key bytes never appear in any stdout, stderr, log record, or RPC
/// response").
#[derive(Clone)]
pub struct AdminKeypair {
    inner: KeyPair,
    pub comment: String,
}

impl fmt::Debug for AdminKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminKeypair")
            .field("comment", &self.comment)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl AdminKeypair {
    pub fn public_key(&self) -> PublicKey {
        self.inner.clone_public_key().expect("key pair has a public half")
    }

    /// The `authorized_keys` line the bootstrap protocol writes/looks for.
    pub fn authorized_keys_line(&self) -> String {
        format!(
            "ssh-ed25519 {} {}",
            self.public_key().public_key_base64(),
            self.comment
        )
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.inner
    }
}

pub fn key_paths() -> (PathBuf, PathBuf) {
    let dir = crate::config::SSH_KEY_DIR.clone();
    (dir.join("mcp_admin_rsa"), dir.join("mcp_admin_rsa.pub"))
}

/// Loads the process-wide admin keypair, generating it on first start (§4.1,
/// §4.9). The private key file is created with mode 0600.
pub fn load_or_generate(comment: &str) -> Result<AdminKeypair, ServerError> {
    let (priv_path, pub_path) = key_paths();
    if priv_path.exists() {
        load(&priv_path, comment)
    } else {
        generate(&priv_path, &pub_path, comment)
    }
}

pub fn load(priv_path: &Path, comment: &str) -> Result<AdminKeypair, ServerError> {
    let inner = russh_keys::load_secret_key(priv_path, None)
        .map_err(|e| ServerError::Config(format!("loading ssh key {}: {e}", priv_path.display())))?;
    Ok(AdminKeypair {
        inner,
        comment: comment.to_string(),
    })
}

pub fn generate(priv_path: &Path, pub_path: &Path, comment: &str) -> Result<AdminKeypair, ServerError> {
    if let Some(parent) = priv_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ServerError::Config(format!("creating ssh key dir: {e}")))?;
    }
    let inner = KeyPair::generate_ed25519()
        .ok_or_else(|| ServerError::Config("ed25519 keypair generation failed".into()))?;
    let keypair = AdminKeypair {
        inner,
        comment: comment.to_string(),
    };

    russh_keys::encode_pkcs8_pem(keypair.key_pair(), priv_path)
        .map_err(|e| ServerError::Config(format!("writing private key: {e}")))?;
    set_private_key_permissions(priv_path)?;
    std::fs::write(pub_path, format!("{}\n", keypair.authorized_keys_line()))
        .map_err(|e| ServerError::Config(format!("writing public key: {e}")))?;

    tracing::info!(path = %priv_path.display(), "generated admin ssh keypair");
    Ok(keypair)
}

#[cfg(unix)]
fn set_private_key_permissions(path: &Path) -> Result<(), ServerError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .map_err(|e| ServerError::Config(format!("chmod private key: {e}")))
}

#[cfg(not(unix))]
fn set_private_key_permissions(_path: &Path) -> Result<(), ServerError> {
    Ok(())
}
