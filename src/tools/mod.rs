pub mod discovery;
pub mod install;
pub mod sitemap;
pub mod ssh_admin;
pub mod terraform_tools;

use std::sync::Arc;

use crate::error::ServerError;
use crate::installer::ServiceInstaller;
use crate::registry::ToolRegistry;
use crate::ssh::SshExecutor;
use crate::store::DeviceStore;
use crate::terraform::TerraformDriver;

/// Shared handles every tool handler closes over. Constructed once at
/// bootstrap (C9) and cloned (cheaply, via `Arc`) into each registered
/// closure.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Arc<DeviceStore>,
    pub ssh: Arc<dyn SshExecutor>,
    pub installer: Arc<ServiceInstaller>,
    pub terraform: Arc<TerraformDriver>,
    pub server_hostname: String,
}

/// Registers every tool named across §4.3, §8 scenario 1, and SPEC_FULL §B.
pub fn register_all(registry: &mut ToolRegistry, ctx: ToolContext) -> Result<(), ServerError> {
    discovery::register(registry, &ctx)?;
    ssh_admin::register(registry, &ctx)?;
    install::register(registry, &ctx)?;
    terraform_tools::register(registry, &ctx)?;
    sitemap::register(registry, &ctx)?;
    Ok(())
}
