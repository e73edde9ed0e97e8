pub mod model;
pub mod staleness;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use model::{
    AuthKind, Device, DeviceFilter, DeviceRole, DeviceUpsert, DiscoveredFacts, HistoryEntry,
    HistoryKind, InstallMethod, InstalledService, ServiceHealth, UpsertOutcome,
};

/// Durable inventory of the fleet (C2). A single `SqlitePool` writer is
/// assumed; per-device mutation is additionally serialized through
/// `locks`, matching the per-device async lock the concurrency model (§5)
/// requires on top of whatever the backing engine itself guarantees.
pub struct DeviceStore {
    pool: SqlitePool,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl DeviceStore {
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, device_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(device_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert-or-merge a device, per §4.2. Non-null discovered facts win on
    /// merge; explicit nulls are ignored unless `reset_fields` is set.
    pub async fn upsert(&self, upsert: DeviceUpsert) -> Result<(i64, UpsertOutcome, i64), sqlx::Error> {
        let existing = self.find_by_identity(&upsert).await?;
        match existing {
            Some(device) => {
                let lock = self.lock_for(device.id);
                let _guard = lock.lock().await;
                let merged = merge(device.clone(), &upsert);
                let new_version = device.version + 1;
                let mut tx = self.pool.begin().await?;
                write_device(&mut tx, &merged, new_version).await?;
                append_history(
                    &mut tx,
                    merged.id,
                    HistoryKind::Updated,
                    json!({"upsert": &upsert}),
                )
                .await?;
                tx.commit().await?;
                Ok((merged.id, UpsertOutcome::Updated, new_version))
            }
            None => {
                let now = Utc::now();
                let facts = upsert.facts.clone().unwrap_or_default();
                let row = sqlx::query(
                    "INSERT INTO devices (hostname, ip_address, username, auth_kind, credential_ref,
                        os_family, os_version, cpu_model, cpu_cores, cpu_threads, memory_gb,
                        disks, interfaces, gpus, pci_devices, uptime_seconds, kernel,
                        role, excluded_from_deployments, notes, created_at, version)
                     VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,1) RETURNING id",
                )
                .bind(&upsert.hostname)
                .bind(&upsert.ip_address)
                .bind(&upsert.username)
                .bind(auth_kind_str(upsert.auth_kind.unwrap_or(AuthKind::Key)))
                .bind(&upsert.credential_ref)
                .bind(&facts.os_family)
                .bind(&facts.os_version)
                .bind(&facts.cpu_model)
                .bind(facts.cpu_cores)
                .bind(facts.cpu_threads)
                .bind(facts.memory_gb)
                .bind(serde_json::to_string(&facts.disks).unwrap())
                .bind(serde_json::to_string(&facts.interfaces).unwrap())
                .bind(serde_json::to_string(&facts.gpus).unwrap())
                .bind(serde_json::to_string(&facts.pci_devices).unwrap())
                .bind(facts.uptime_seconds)
                .bind(&facts.kernel)
                .bind(role_str(upsert.role.unwrap_or_default()))
                .bind(upsert.excluded_from_deployments.unwrap_or(false))
                .bind(&upsert.notes)
                .bind(now.to_rfc3339())
                .fetch_one(&self.pool)
                .await?;
                let id: i64 = row.get("id");
                let mut tx = self.pool.begin().await?;
                append_history(&mut tx, id, HistoryKind::Created, json!({"upsert": &upsert})).await?;
                tx.commit().await?;
                Ok((id, UpsertOutcome::Created, 1))
            }
        }
    }

    async fn find_by_identity(&self, upsert: &DeviceUpsert) -> Result<Option<Device>, sqlx::Error> {
        if let Some(hostname) = &upsert.hostname {
            if let Some(d) = self.get_by_hostname(hostname).await? {
                return Ok(Some(d));
            }
        }
        if let Some(ip) = &upsert.ip_address {
            if let Some(d) = self.get_by_ip(ip).await? {
                return Ok(Some(d));
            }
        }
        Ok(None)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Device>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut device = device_from_row(row)?;
                device.services = self.load_services(device.id).await?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_hostname(&self, hostname: &str) -> Result<Option<Device>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM devices WHERE hostname = ?")
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut device = device_from_row(row)?;
                device.services = self.load_services(device.id).await?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_ip(&self, ip: &str) -> Result<Option<Device>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM devices WHERE ip_address = ?")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut device = device_from_row(row)?;
                device.services = self.load_services(device.id).await?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    async fn load_services(&self, device_id: i64) -> Result<Vec<InstalledService>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM installed_services WHERE device_id = ? ORDER BY service_name")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(service_from_row).collect()
    }

    pub async fn list(&self, filter: &DeviceFilter) -> Result<Vec<Device>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM devices ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::new();
        for row in rows {
            let mut device = device_from_row(row)?;
            if let Some(role) = filter.role {
                if device.role != role {
                    continue;
                }
            }
            if filter.exclude_deployments_excluded && device.excluded_from_deployments {
                continue;
            }
            if filter.stale_only {
                let threshold = filter
                    .staleness_hours
                    .map(chrono::Duration::hours)
                    .unwrap_or_else(default_staleness);
                if !is_stale_at(device.last_discovery_at, threshold) {
                    continue;
                }
            }
            device.services = self.load_services(device.id).await?;
            out.push(device);
        }
        Ok(out)
    }

    pub async fn delete(&self, id: i64) -> Result<(), sqlx::Error> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut tx = self.pool.begin().await?;
        append_history(&mut tx, id, HistoryKind::Deleted, json!({})).await?;
        sqlx::query("DELETE FROM installed_services WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_service(
        &self,
        device_id: i64,
        service: InstalledService,
    ) -> Result<(), sqlx::Error> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO installed_services (device_id, service_name, version, method, ports,
                config_digest, installed_at, health, deployment_dir)
             VALUES (?,?,?,?,?,?,?,?,?)
             ON CONFLICT(device_id, service_name) DO UPDATE SET
                version = excluded.version, method = excluded.method, ports = excluded.ports,
                config_digest = excluded.config_digest, installed_at = excluded.installed_at,
                health = excluded.health, deployment_dir = excluded.deployment_dir",
        )
        .bind(device_id)
        .bind(&service.service_name)
        .bind(&service.version)
        .bind(method_str(service.method))
        .bind(serde_json::to_string(&service.ports).unwrap())
        .bind(&service.config_digest)
        .bind(service.installed_at.to_rfc3339())
        .bind(health_str(service.health))
        .bind(&service.deployment_dir)
        .execute(&mut *tx)
        .await?;
        append_history(
            &mut tx,
            device_id,
            HistoryKind::ServiceInstalled,
            json!({"service_name": service.service_name}),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn forget_service(&self, device_id: i64, service_name: &str) -> Result<(), sqlx::Error> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM installed_services WHERE device_id = ? AND service_name = ?")
            .bind(device_id)
            .bind(service_name)
            .execute(&mut *tx)
            .await?;
        append_history(
            &mut tx,
            device_id,
            HistoryKind::ServiceRemoved,
            json!({"service_name": service_name}),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn is_stale(&self, device_id: i64, threshold: chrono::Duration) -> Result<bool, sqlx::Error> {
        let device = self.get(device_id).await?;
        Ok(match device {
            Some(d) => is_stale_at(d.last_discovery_at, threshold),
            None => true,
        })
    }

    /// Best-effort mutual exclusion for discovery refreshes: only one
    /// refresh may be in flight per device (§4.2). Returns `false` if a
    /// refresh is already running.
    pub async fn mark_refreshing(&self, device_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE devices SET refreshing = 1 WHERE id = ? AND refreshing = 0",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_refreshed(&self, device_id: i64, outcome_facts: Option<DiscoveredFacts>) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        if let Some(facts) = outcome_facts {
            sqlx::query(
                "UPDATE devices SET refreshing = 0, last_discovery_at = ?, last_seen_at = ?,
                    os_family = ?, os_version = ?, cpu_model = ?, cpu_cores = ?, cpu_threads = ?,
                    memory_gb = ?, disks = ?, interfaces = ?, gpus = ?, pci_devices = ?,
                    uptime_seconds = ?, kernel = ?, version = version + 1
                 WHERE id = ?",
            )
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(&facts.os_family)
            .bind(&facts.os_version)
            .bind(&facts.cpu_model)
            .bind(facts.cpu_cores)
            .bind(facts.cpu_threads)
            .bind(facts.memory_gb)
            .bind(serde_json::to_string(&facts.disks).unwrap())
            .bind(serde_json::to_string(&facts.interfaces).unwrap())
            .bind(serde_json::to_string(&facts.gpus).unwrap())
            .bind(serde_json::to_string(&facts.pci_devices).unwrap())
            .bind(facts.uptime_seconds)
            .bind(&facts.kernel)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
            let mut tx = self.pool.begin().await?;
            append_history(&mut tx, device_id, HistoryKind::Discovered, json!({})).await?;
            tx.commit().await?;
        } else {
            sqlx::query("UPDATE devices SET refreshing = 0 WHERE id = ?")
                .bind(device_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Inserts a history entry with its original timestamp, for
    /// `import-inventory` replay (SPEC_FULL §B) rather than deriving a new
    /// one from the current time.
    pub async fn replay_history(&self, entry: &HistoryEntry) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO device_history (device_id, timestamp, kind, diff_payload) VALUES (?,?,?,?)")
            .bind(entry.device_id)
            .bind(entry.timestamp.to_rfc3339())
            .bind(history_kind_str(entry.kind))
            .bind(entry.diff_payload.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn history(&self, device_id: i64, since: Option<DateTime<Utc>>) -> Result<Vec<HistoryEntry>, sqlx::Error> {
        let rows = if let Some(since) = since {
            sqlx::query("SELECT * FROM device_history WHERE device_id = ? AND timestamp >= ? ORDER BY id")
                .bind(device_id)
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM device_history WHERE device_id = ? ORDER BY id")
                .bind(device_id)
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(history_from_row).collect()
    }
}

pub fn default_staleness() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Resolves the "stale when never discovered" open question from §9: a
/// device with `last_discovery_at = null` is treated as immediately stale,
/// not fresh-until-first-discovery — a freshly added device is exactly the
/// case the staleness model exists to surface for a first discovery run.
fn is_stale_at(last_discovery_at: Option<DateTime<Utc>>, threshold: chrono::Duration) -> bool {
    match last_discovery_at {
        None => true,
        Some(t) => Utc::now() - t > threshold,
    }
}

fn merge(existing: Device, upsert: &DeviceUpsert) -> Device {
    let mut d = existing;
    macro_rules! merge_field {
        ($field:ident) => {
            if let Some(v) = upsert.$field.clone() {
                d.$field = Some(v);
            } else if upsert.reset_fields {
                d.$field = None;
            }
        };
    }
    merge_field!(hostname);
    merge_field!(ip_address);
    merge_field!(username);
    merge_field!(credential_ref);
    merge_field!(notes);

    if let Some(kind) = upsert.auth_kind {
        d.auth_kind = kind;
    }
    if let Some(role) = upsert.role {
        d.role = role;
    }
    if let Some(excluded) = upsert.excluded_from_deployments {
        d.excluded_from_deployments = excluded;
    }
    if let Some(facts) = &upsert.facts {
        merge_facts(&mut d.facts, facts, upsert.reset_fields);
    }
    d
}

fn merge_facts(into: &mut DiscoveredFacts, from: &DiscoveredFacts, reset_fields: bool) {
    macro_rules! merge_opt {
        ($field:ident) => {
            if from.$field.is_some() {
                into.$field = from.$field.clone();
            } else if reset_fields {
                into.$field = None;
            }
        };
    }
    merge_opt!(os_family);
    merge_opt!(os_version);
    merge_opt!(cpu_model);
    merge_opt!(cpu_cores);
    merge_opt!(cpu_threads);
    merge_opt!(memory_gb);
    merge_opt!(uptime_seconds);
    merge_opt!(kernel);
    if !from.disks.is_empty() || reset_fields {
        into.disks = from.disks.clone();
    }
    if !from.interfaces.is_empty() || reset_fields {
        into.interfaces = from.interfaces.clone();
    }
    if !from.gpus.is_empty() || reset_fields {
        into.gpus = from.gpus.clone();
    }
    if !from.pci_devices.is_empty() || reset_fields {
        into.pci_devices = from.pci_devices.clone();
    }
}

async fn write_device(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    device: &Device,
    new_version: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE devices SET hostname=?, ip_address=?, username=?, auth_kind=?, credential_ref=?,
            os_family=?, os_version=?, cpu_model=?, cpu_cores=?, cpu_threads=?, memory_gb=?,
            disks=?, interfaces=?, gpus=?, pci_devices=?, uptime_seconds=?, kernel=?,
            role=?, excluded_from_deployments=?, notes=?, version=? WHERE id=?",
    )
    .bind(&device.hostname)
    .bind(&device.ip_address)
    .bind(&device.username)
    .bind(auth_kind_str(device.auth_kind))
    .bind(&device.credential_ref)
    .bind(&device.facts.os_family)
    .bind(&device.facts.os_version)
    .bind(&device.facts.cpu_model)
    .bind(device.facts.cpu_cores)
    .bind(device.facts.cpu_threads)
    .bind(device.facts.memory_gb)
    .bind(serde_json::to_string(&device.facts.disks).unwrap())
    .bind(serde_json::to_string(&device.facts.interfaces).unwrap())
    .bind(serde_json::to_string(&device.facts.gpus).unwrap())
    .bind(serde_json::to_string(&device.facts.pci_devices).unwrap())
    .bind(device.facts.uptime_seconds)
    .bind(&device.facts.kernel)
    .bind(role_str(device.role))
    .bind(device.excluded_from_deployments)
    .bind(&device.notes)
    .bind(new_version)
    .bind(device.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    device_id: i64,
    kind: HistoryKind,
    diff_payload: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO device_history (device_id, timestamp, kind, diff_payload) VALUES (?,?,?,?)")
        .bind(device_id)
        .bind(Utc::now().to_rfc3339())
        .bind(history_kind_str(kind))
        .bind(diff_payload.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn device_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Device, sqlx::Error> {
    let disks: String = row.get("disks");
    let interfaces: String = row.get("interfaces");
    let gpus: String = row.get("gpus");
    let pci: String = row.get("pci_devices");
    let created_at: String = row.get("created_at");
    let last_seen_at: Option<String> = row.get("last_seen_at");
    let last_discovery_at: Option<String> = row.get("last_discovery_at");

    Ok(Device {
        id: row.get("id"),
        hostname: row.get("hostname"),
        ip_address: row.get("ip_address"),
        username: row.get("username"),
        auth_kind: parse_auth_kind(row.get::<String, _>("auth_kind")),
        credential_ref: row.get("credential_ref"),
        facts: DiscoveredFacts {
            os_family: row.get("os_family"),
            os_version: row.get("os_version"),
            cpu_model: row.get("cpu_model"),
            cpu_cores: row.get("cpu_cores"),
            cpu_threads: row.get("cpu_threads"),
            memory_gb: row.get("memory_gb"),
            disks: serde_json::from_str(&disks).unwrap_or_default(),
            interfaces: serde_json::from_str(&interfaces).unwrap_or_default(),
            gpus: serde_json::from_str(&gpus).unwrap_or_default(),
            pci_devices: serde_json::from_str(&pci).unwrap_or_default(),
            uptime_seconds: row.get("uptime_seconds"),
            kernel: row.get("kernel"),
        },
        role: parse_role(row.get::<String, _>("role")),
        excluded_from_deployments: row.get::<bool, _>("excluded_from_deployments"),
        notes: row.get("notes"),
        services: Vec::new(),
        created_at: DateTime::parse_from_rfc3339(&created_at).unwrap().with_timezone(&Utc),
        last_seen_at: last_seen_at.map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
        last_discovery_at: last_discovery_at.map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
        version: row.get("version"),
    })
}

fn service_from_row(row: sqlx::sqlite::SqliteRow) -> Result<InstalledService, sqlx::Error> {
    let ports: String = row.get("ports");
    let installed_at: String = row.get("installed_at");
    Ok(InstalledService {
        service_name: row.get("service_name"),
        version: row.get("version"),
        method: parse_method(row.get::<String, _>("method")),
        ports: serde_json::from_str(&ports).unwrap_or_default(),
        config_digest: row.get("config_digest"),
        installed_at: DateTime::parse_from_rfc3339(&installed_at).unwrap().with_timezone(&Utc),
        health: parse_health(row.get::<String, _>("health")),
        deployment_dir: row.get("deployment_dir"),
    })
}

fn parse_method(s: String) -> InstallMethod {
    match s.as_str() {
        "ansible" => InstallMethod::Ansible,
        "terraform" => InstallMethod::Terraform,
        "script" => InstallMethod::Script,
        _ => InstallMethod::DockerCompose,
    }
}

fn parse_health(s: String) -> ServiceHealth {
    match s.as_str() {
        "healthy" => ServiceHealth::Healthy,
        "unhealthy" => ServiceHealth::Unhealthy,
        _ => ServiceHealth::Unknown,
    }
}

fn history_from_row(row: sqlx::sqlite::SqliteRow) -> Result<HistoryEntry, sqlx::Error> {
    let timestamp: String = row.get("timestamp");
    let diff_payload: String = row.get("diff_payload");
    Ok(HistoryEntry {
        device_id: row.get("device_id"),
        timestamp: DateTime::parse_from_rfc3339(&timestamp).unwrap().with_timezone(&Utc),
        kind: parse_history_kind(row.get::<String, _>("kind")),
        diff_payload: serde_json::from_str(&diff_payload).unwrap_or(json!({})),
    })
}

fn auth_kind_str(k: AuthKind) -> &'static str {
    match k {
        AuthKind::Password => "password",
        AuthKind::Key => "key",
        AuthKind::Agent => "agent",
    }
}

fn parse_auth_kind(s: String) -> AuthKind {
    match s.as_str() {
        "password" => AuthKind::Password,
        "agent" => AuthKind::Agent,
        _ => AuthKind::Key,
    }
}

fn role_str(r: DeviceRole) -> &'static str {
    match r {
        DeviceRole::Development => "development",
        DeviceRole::InfrastructureHost => "infrastructure_host",
        DeviceRole::ServiceHost => "service_host",
        DeviceRole::NetworkDevice => "network_device",
        DeviceRole::StorageDevice => "storage_device",
        DeviceRole::Unknown => "unknown",
    }
}

fn parse_role(s: String) -> DeviceRole {
    match s.as_str() {
        "development" => DeviceRole::Development,
        "infrastructure_host" => DeviceRole::InfrastructureHost,
        "service_host" => DeviceRole::ServiceHost,
        "network_device" => DeviceRole::NetworkDevice,
        "storage_device" => DeviceRole::StorageDevice,
        _ => DeviceRole::Unknown,
    }
}

fn method_str(m: InstallMethod) -> &'static str {
    match m {
        InstallMethod::DockerCompose => "docker_compose",
        InstallMethod::Ansible => "ansible",
        InstallMethod::Terraform => "terraform",
        InstallMethod::Script => "script",
    }
}

fn health_str(h: ServiceHealth) -> &'static str {
    match h {
        ServiceHealth::Healthy => "healthy",
        ServiceHealth::Unhealthy => "unhealthy",
        ServiceHealth::Unknown => "unknown",
    }
}

fn history_kind_str(k: HistoryKind) -> &'static str {
    match k {
        HistoryKind::Created => "created",
        HistoryKind::Discovered => "discovered",
        HistoryKind::Updated => "updated",
        HistoryKind::RoleChanged => "role_changed",
        HistoryKind::ServiceInstalled => "service_installed",
        HistoryKind::ServiceRemoved => "service_removed",
        HistoryKind::Deleted => "deleted",
    }
}

fn parse_history_kind(s: String) -> HistoryKind {
    match s.as_str() {
        "created" => HistoryKind::Created,
        "discovered" => HistoryKind::Discovered,
        "role_changed" => HistoryKind::RoleChanged,
        "service_installed" => HistoryKind::ServiceInstalled,
        "service_removed" => HistoryKind::ServiceRemoved,
        "deleted" => HistoryKind::Deleted,
        _ => HistoryKind::Updated,
    }
}
