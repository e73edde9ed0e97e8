use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Password,
    Key,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Development,
    InfrastructureHost,
    ServiceHost,
    NetworkDevice,
    StorageDevice,
    Unknown,
}

impl Default for DeviceRole {
    fn default() -> Self {
        DeviceRole::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskType {
    Nvme,
    Ssd,
    Hdd,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub device: String,
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    pub size_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac_address: Option<String>,
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpu {
    pub vendor: String,
    pub model: String,
    pub memory_gb: Option<f64>,
    #[serde(default)]
    pub capability_tags: Vec<String>,
}

/// The last-known facts gathered by discovery. All fields nullable: a device
/// that has never been discovered carries an empty `DiscoveredFacts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredFacts {
    pub os_family: Option<String>,
    pub os_version: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<i64>,
    pub cpu_threads: Option<i64>,
    pub memory_gb: Option<f64>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub gpus: Vec<Gpu>,
    #[serde(default)]
    pub pci_devices: Vec<String>,
    pub uptime_seconds: Option<i64>,
    pub kernel: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    DockerCompose,
    Ansible,
    Terraform,
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledService {
    pub service_name: String,
    pub version: Option<String>,
    pub method: InstallMethod,
    #[serde(default)]
    pub ports: Vec<u16>,
    pub config_digest: String,
    pub installed_at: DateTime<Utc>,
    pub health: ServiceHealth,
    pub deployment_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub username: Option<String>,
    pub auth_kind: AuthKind,
    /// Opaque reference into the credential store; never the secret itself.
    pub credential_ref: Option<String>,
    pub facts: DiscoveredFacts,
    pub role: DeviceRole,
    pub excluded_from_deployments: bool,
    pub notes: Option<String>,
    pub services: Vec<InstalledService>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_discovery_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// A new or updated device as supplied by a caller; `id`/`version`/`created_at`
/// are server-assigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceUpsert {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub username: Option<String>,
    pub auth_kind: Option<AuthKind>,
    pub credential_ref: Option<String>,
    pub facts: Option<DiscoveredFacts>,
    pub role: Option<DeviceRole>,
    pub excluded_from_deployments: Option<bool>,
    pub notes: Option<String>,
    /// When true, explicit nulls in this payload overwrite existing fields
    /// instead of being ignored (§4.2 upsert semantics).
    #[serde(default)]
    pub reset_fields: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Created,
    Discovered,
    Updated,
    RoleChanged,
    ServiceInstalled,
    ServiceRemoved,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: HistoryKind,
    pub diff_payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Default, Clone)]
pub struct DeviceFilter {
    pub role: Option<DeviceRole>,
    pub exclude_deployments_excluded: bool,
    pub stale_only: bool,
    /// Staleness threshold in hours; only consulted when `stale_only` is set.
    /// `None` falls back to the store's default (24h).
    pub staleness_hours: Option<i64>,
}
