use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::ServerError;

/// Directory holding the server's keypair, mirroring the teacher's
/// JWT-secret-must-be-set pattern but for an optional, defaulted path.
pub static SSH_KEY_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("MCP_ADMIN_KEY_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs_home()
                .join(".ssh")
        })
});

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/root"))
}

/// Host-key verification policy for the SSH executor (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    Strict,
    TrustOnFirstUse,
    AcceptAll,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::TrustOnFirstUse
    }
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(HostKeyPolicy::Strict),
            "trust-on-first-use" | "tofu" => Ok(HostKeyPolicy::TrustOnFirstUse),
            "accept-all" => Ok(HostKeyPolicy::AcceptAll),
            other => Err(format!("unknown host key policy: {other}")),
        }
    }
}

/// Which transports to start, and how. Assembled once during bootstrap (C9)
/// from environment variables and an optional TOML file; env wins over file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_name: String,
    pub server_version: String,
    pub inventory_path: PathBuf,
    pub inventory_staleness_hours: u64,
    pub ansible_host_key_checking: bool,
    pub ansible_inventory_path: Option<PathBuf>,
    pub template_dir: PathBuf,
    pub terraform_state_root: PathBuf,
    pub http_bind: String,
    pub ws_bind: Option<String>,
    pub stdio: bool,
    pub http_stateless: bool,
    pub ssh_host_key_policy: HostKeyPolicy,
    pub managed_user: String,
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "homelab-mcp".into(),
            server_version: env!("CARGO_PKG_VERSION").into(),
            inventory_path: PathBuf::from("./inventory"),
            inventory_staleness_hours: 24,
            ansible_host_key_checking: false,
            ansible_inventory_path: None,
            template_dir: PathBuf::from("./templates"),
            terraform_state_root: PathBuf::from("./inventory/terraform"),
            http_bind: "0.0.0.0:8787".into(),
            ws_bind: None,
            stdio: false,
            http_stateless: true,
            ssh_host_key_policy: HostKeyPolicy::TrustOnFirstUse,
            managed_user: "mcp_admin".into(),
            shutdown_grace_seconds: 20,
        }
    }
}

impl ServerConfig {
    /// Loads config-file defaults (if `MCP_CONFIG_PATH` is set) then applies
    /// environment variable overrides, per spec §6 and §4.9.
    pub fn load() -> Result<Self, ServerError> {
        let mut cfg = if let Ok(path) = std::env::var("MCP_CONFIG_PATH") {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ServerError::Config(format!("reading {path}: {e}")))?;
            toml::from_str(&text)
                .map_err(|e| ServerError::Config(format!("parsing {path}: {e}")))?
        } else {
            ServerConfig::default()
        };

        if let Ok(v) = std::env::var("MCP_SERVER_NAME") {
            cfg.server_name = v;
        }
        if let Ok(v) = std::env::var("MCP_SERVER_VERSION") {
            cfg.server_version = v;
        }
        if let Ok(v) = std::env::var("INVENTORY_PATH") {
            cfg.inventory_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INVENTORY_STALENESS_HOURS") {
            cfg.inventory_staleness_hours = v
                .parse()
                .map_err(|_| ServerError::Config("INVENTORY_STALENESS_HOURS must be an integer".into()))?;
        }
        if let Ok(v) = std::env::var("ANSIBLE_HOST_KEY_CHECKING") {
            cfg.ansible_host_key_checking = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ANSIBLE_INVENTORY_PATH") {
            cfg.ansible_inventory_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MCP_HTTP_BIND") {
            cfg.http_bind = v;
        }
        if let Ok(v) = std::env::var("MCP_WS_BIND") {
            cfg.ws_bind = Some(v);
        }
        if let Ok(v) = std::env::var("MCP_STDIO") {
            cfg.stdio = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("MCP_HTTP_STATELESS") {
            cfg.http_stateless = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SSH_HOST_KEY_POLICY") {
            cfg.ssh_host_key_policy = v
                .parse()
                .map_err(ServerError::Config)?;
        }

        Ok(cfg)
    }
}

/// `DEBUG=1` tightens the log level regardless of `LOG_LEVEL`, matching the
/// teacher's convention of a blunt escape hatch alongside the structured
/// `EnvFilter`.
pub fn debug_enabled() -> bool {
    std::env::var("DEBUG").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}
