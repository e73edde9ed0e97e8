use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use homelab_mcp::config::ServerConfig;
use homelab_mcp::error::ServerError;
use homelab_mcp::installer::ServiceInstaller;
#[cfg(feature = "http")]
use homelab_mcp::mcp::transports::http;
use homelab_mcp::mcp::transports::stdio;
#[cfg(feature = "ws")]
use homelab_mcp::mcp::transports::ws;
use homelab_mcp::mcp::McpEngine;
use homelab_mcp::registry::ToolRegistry;
use homelab_mcp::ssh::{keys, RusshExecutor};
use homelab_mcp::store::{staleness, DeviceStore};
use homelab_mcp::templates::{self, TemplateStore};
use homelab_mcp::terraform::TerraformDriver;
use homelab_mcp::tools::{self, ToolContext};

#[derive(Parser)]
#[command(name = "homelab-mcp", about = "MCP server for homelab infrastructure automation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (default if no subcommand is given).
    Serve,
    /// Generate the server's admin SSH keypair.
    GenerateKey {
        #[arg(long)]
        force: bool,
    },
    /// Load every template in a directory and report which ones fail to parse or validate.
    ValidateTemplates {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Dump the device inventory and its history to a JSON file.
    ExportInventory {
        #[arg(long)]
        output: PathBuf,
    },
    /// Replay a previously exported inventory into the store.
    ImportInventory {
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::GenerateKey { force } => generate_key(force),
        Command::ValidateTemplates { dir } => validate_templates(dir),
        Command::ExportInventory { output } => export_inventory(output).await,
        Command::ImportInventory { input } => import_inventory(input).await,
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_logging() {
    let filter = if homelab_mcp::config::debug_enabled() {
        EnvFilter::new("debug")
    } else if let Ok(level) = std::env::var("LOG_LEVEL") {
        EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).json().init();
}

async fn serve() -> Result<(), ServerError> {
    let config = ServerConfig::load()?;
    tracing::info!(server_name = %config.server_name, "starting homelab-mcp");

    let store = Arc::new(DeviceStore::open(&config.inventory_path).await?);

    let admin_keypair = keys::load_or_generate(&format!("{}@homelab-mcp", config.managed_user))?;
    let ssh: Arc<dyn homelab_mcp::ssh::SshExecutor> =
        Arc::new(RusshExecutor::new(config.ssh_host_key_policy, admin_keypair));

    std::fs::create_dir_all(&config.template_dir)
        .map_err(|e| ServerError::Templates(format!("creating {}: {e}", config.template_dir.display())))?;
    let template_store = Arc::new(TemplateStore::load_dir(&config.template_dir)?);

    let terraform = Arc::new(TerraformDriver::new(config.terraform_state_root.clone()));
    let installer = Arc::new(ServiceInstaller::new(
        template_store.clone(),
        store.clone(),
        ssh.clone(),
        terraform.clone(),
        config.inventory_path.join("deployments"),
    ));

    let ctx = ToolContext {
        store: store.clone(),
        ssh: ssh.clone(),
        installer: installer.clone(),
        terraform: terraform.clone(),
        server_hostname: config.managed_user.clone(),
    };

    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry, ctx)?;
    tracing::info!(tool_count = registry.list().len(), "tool registry ready");

    let engine = Arc::new(McpEngine::new(
        Arc::new(registry),
        store.clone(),
        config.server_name.clone(),
        config.server_version.clone(),
        config.http_stateless,
    ));

    let _stale_rx = staleness::start_staleness_scanner(
        store.clone(),
        chrono::Duration::hours(config.inventory_staleness_hours as i64),
        Duration::from_secs(300),
    );

    let mut join_set = tokio::task::JoinSet::new();

    if config.stdio {
        let engine = engine.clone();
        join_set.spawn(async move { stdio::run(engine).await.map_err(|e| ServerError::Transport(e.to_string())) });
    }

    let grace = Duration::from_secs(config.shutdown_grace_seconds);

    #[cfg(feature = "http")]
    {
        let http_addr: std::net::SocketAddr = config
            .http_bind
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid http_bind '{}': {e}", config.http_bind)))?;
        tracing::info!(addr = %http_addr, "listening for MCP connections over streamable HTTP");
        let http_router = http::router(engine.clone());
        let http_grace = grace;
        join_set.spawn(async move {
            axum::Server::bind(&http_addr)
                .serve(http_router.into_make_service())
                .with_graceful_shutdown(shutdown_signal(http_grace))
                .await
                .map_err(|e| ServerError::Transport(e.to_string()))
        });
    }

    #[cfg(feature = "ws")]
    if let Some(ws_bind) = config.ws_bind.clone() {
        let ws_addr: std::net::SocketAddr = ws_bind
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid ws_bind '{ws_bind}': {e}")))?;
        tracing::info!(addr = %ws_addr, "listening for MCP connections over WebSocket");
        let ws_router = ws::router(engine.clone());
        join_set.spawn(async move {
            axum::Server::bind(&ws_addr)
                .serve(ws_router.into_make_service())
                .with_graceful_shutdown(shutdown_signal(grace))
                .await
                .map_err(|e| ServerError::Transport(e.to_string()))
        });
    }

    while let Some(outcome) = join_set.join_next().await {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(join_err) => return Err(ServerError::Transport(format!("transport task panicked: {join_err}"))),
        }
    }

    Ok(())
}

/// Waits for SIGTERM/SIGINT, then allows `grace` for in-flight requests to
/// drain before axum stops accepting connections entirely (§4.9).
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(grace_seconds = grace.as_secs(), "shutdown signal received, draining");
    tokio::time::sleep(grace).await;
}

fn generate_key(force: bool) -> Result<(), ServerError> {
    let (priv_path, pub_path) = keys::key_paths();
    if priv_path.exists() && !force {
        return Err(ServerError::Config(format!(
            "key already exists at {} (pass --force to overwrite)",
            priv_path.display()
        )));
    }
    let config = ServerConfig::load()?;
    keys::generate(&priv_path, &pub_path, &format!("{}@homelab-mcp", config.managed_user))?;
    println!("wrote {}", priv_path.display());
    Ok(())
}

fn validate_templates(dir: Option<PathBuf>) -> Result<(), ServerError> {
    let config = ServerConfig::load()?;
    let dir = dir.unwrap_or(config.template_dir);

    let mut names = Vec::new();
    let mut failed = false;
    let entries = std::fs::read_dir(&dir)
        .map_err(|e| ServerError::Templates(format!("reading {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                println!("FAIL <unreadable entry>: {e}");
                failed = true;
                continue;
            }
        };
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }
        let label = path.file_stem().and_then(|s| s.to_str()).unwrap_or("?").to_string();
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_yaml::from_str::<templates::ServiceTemplate>(&raw).map_err(|e| e.to_string()))
            .and_then(|tpl| tpl.validate().map(|_| tpl))
        {
            Ok(tpl) => {
                println!("OK {}", tpl.name);
                names.push(tpl.name);
            }
            Err(reason) => {
                println!("FAIL {label}: {reason}");
                failed = true;
            }
        }
    }

    if failed {
        Err(ServerError::Templates(format!("one or more templates in {} failed validation", dir.display())))
    } else {
        Ok(())
    }
}

async fn export_inventory(output: PathBuf) -> Result<(), ServerError> {
    let config = ServerConfig::load()?;
    let store = DeviceStore::open(&config.inventory_path).await?;
    let devices = store.list(&homelab_mcp::store::model::DeviceFilter::default()).await?;

    let mut history = Vec::new();
    for device in &devices {
        history.extend(store.history(device.id, None).await?);
    }

    let document = serde_json::json!({"devices": devices, "history": history});
    let encoded = serde_json::to_string_pretty(&document)
        .map_err(|e| ServerError::Other(anyhow::anyhow!("encoding inventory export: {e}")))?;
    std::fs::write(&output, encoded)
        .map_err(|e| ServerError::Other(anyhow::anyhow!("writing {}: {e}", output.display())))?;
    tracing::info!(devices = devices.len(), path = %output.display(), "exported inventory");
    Ok(())
}

/// Replays an exported inventory: one `upsert` per device (so re-running the
/// same export is idempotent), followed by the original history verbatim.
async fn import_inventory(input: PathBuf) -> Result<(), ServerError> {
    let config = ServerConfig::load()?;
    let store = DeviceStore::open(&config.inventory_path).await?;

    let raw = std::fs::read_to_string(&input)
        .map_err(|e| ServerError::Other(anyhow::anyhow!("reading {}: {e}", input.display())))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| ServerError::Other(anyhow::anyhow!("parsing {}: {e}", input.display())))?;

    let devices: Vec<homelab_mcp::store::model::Device> = serde_json::from_value(
        document.get("devices").cloned().unwrap_or(serde_json::Value::Array(vec![])),
    )
    .map_err(|e| ServerError::Other(anyhow::anyhow!("decoding devices: {e}")))?;
    let history: Vec<homelab_mcp::store::model::HistoryEntry> = serde_json::from_value(
        document.get("history").cloned().unwrap_or(serde_json::Value::Array(vec![])),
    )
    .map_err(|e| ServerError::Other(anyhow::anyhow!("decoding history: {e}")))?;

    let mut id_map = std::collections::HashMap::new();
    let mut imported = 0usize;
    for device in devices {
        let (new_id, _, _) = store
            .upsert(homelab_mcp::store::model::DeviceUpsert {
                hostname: device.hostname,
                ip_address: device.ip_address,
                username: device.username,
                auth_kind: Some(device.auth_kind),
                credential_ref: device.credential_ref,
                facts: Some(device.facts),
                role: Some(device.role),
                excluded_from_deployments: Some(device.excluded_from_deployments),
                notes: device.notes,
                reset_fields: true,
            })
            .await?;
        id_map.insert(device.id, new_id);
        imported += 1;
    }

    let mut replayed = 0usize;
    for mut entry in history {
        if let Some(&new_id) = id_map.get(&entry.device_id) {
            entry.device_id = new_id;
            store.replay_history(&entry).await?;
            replayed += 1;
        }
    }

    tracing::info!(devices = imported, history_entries = replayed, path = %input.display(), "imported inventory");
    Ok(())
}
