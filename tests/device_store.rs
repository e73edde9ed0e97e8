use chrono::Duration as ChronoDuration;
use homelab_mcp::store::model::{AuthKind, DeviceFilter, DeviceRole, DeviceUpsert, DiscoveredFacts, HistoryKind};
use homelab_mcp::store::DeviceStore;

async fn open_store() -> (DeviceStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("devices.db");
    let store = DeviceStore::open(&path).await.expect("open store");
    (store, dir)
}

#[tokio::test]
async fn upsert_creates_then_updates_with_increasing_version() {
    let (store, _dir) = open_store().await;

    let (id, outcome, version) = store
        .upsert(DeviceUpsert {
            hostname: Some("h1".into()),
            ip_address: Some("10.0.0.1".into()),
            auth_kind: Some(AuthKind::Key),
            ..Default::default()
        })
        .await
        .expect("first upsert");
    assert!(matches!(outcome, homelab_mcp::store::model::UpsertOutcome::Created));
    assert_eq!(version, 1);

    let (id2, outcome2, version2) = store
        .upsert(DeviceUpsert {
            hostname: Some("h1".into()),
            notes: Some("updated".into()),
            ..Default::default()
        })
        .await
        .expect("second upsert");
    assert_eq!(id, id2);
    assert!(matches!(outcome2, homelab_mcp::store::model::UpsertOutcome::Updated));
    assert!(version2 > version);

    let device = store.get(id).await.expect("get").expect("device present");
    assert_eq!(device.version, version2);
    assert_eq!(device.notes.as_deref(), Some("updated"));
    // ip_address from the first upsert must survive a partial merge.
    assert_eq!(device.ip_address.as_deref(), Some("10.0.0.1"));
}

#[tokio::test]
async fn upsert_emits_monotonic_history_entries() {
    let (store, _dir) = open_store().await;

    let (id, _, _) = store
        .upsert(DeviceUpsert {
            hostname: Some("h2".into()),
            ..Default::default()
        })
        .await
        .expect("create");
    store
        .upsert(DeviceUpsert {
            hostname: Some("h2".into()),
            role: Some(DeviceRole::ServiceHost),
            ..Default::default()
        })
        .await
        .expect("update");

    let history = store.history(id, None).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, HistoryKind::Created);
    assert_eq!(history[1].kind, HistoryKind::Updated);
    assert!(history[1].timestamp >= history[0].timestamp);
    let now = chrono::Utc::now();
    for entry in &history {
        assert!(entry.timestamp <= now);
    }
}

#[tokio::test]
async fn never_discovered_device_is_immediately_stale() {
    let (store, _dir) = open_store().await;
    let (id, _, _) = store
        .upsert(DeviceUpsert {
            hostname: Some("fresh.local".into()),
            ..Default::default()
        })
        .await
        .expect("create");

    // §9 open question, resolved in store::mod.rs: a device that has never
    // been discovered is stale, not fresh-until-first-discovery.
    assert!(store.is_stale(id, ChronoDuration::hours(24)).await.expect("is_stale"));
}

#[tokio::test]
async fn mark_refreshing_serializes_concurrent_refresh_attempts() {
    let (store, _dir) = open_store().await;
    let (id, _, _) = store
        .upsert(DeviceUpsert {
            hostname: Some("h3".into()),
            ..Default::default()
        })
        .await
        .expect("create");

    assert!(store.mark_refreshing(id).await.expect("first refresh claim"));
    assert!(!store.mark_refreshing(id).await.expect("second refresh claim"));

    store
        .mark_refreshed(id, Some(DiscoveredFacts::default()))
        .await
        .expect("mark refreshed");
    assert!(store.mark_refreshing(id).await.expect("refresh claim after completion"));
}

#[tokio::test]
async fn list_filters_by_role_and_staleness() {
    let (store, _dir) = open_store().await;
    store
        .upsert(DeviceUpsert {
            hostname: Some("dev1".into()),
            role: Some(DeviceRole::Development),
            ..Default::default()
        })
        .await
        .expect("create dev1");
    let (svc_id, _, _) = store
        .upsert(DeviceUpsert {
            hostname: Some("svc1".into()),
            role: Some(DeviceRole::ServiceHost),
            ..Default::default()
        })
        .await
        .expect("create svc1");
    store
        .mark_refreshed(svc_id, Some(DiscoveredFacts::default()))
        .await
        .expect("mark refreshed");

    let service_hosts = store
        .list(&DeviceFilter {
            role: Some(DeviceRole::ServiceHost),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(service_hosts.len(), 1);
    assert_eq!(service_hosts[0].hostname.as_deref(), Some("svc1"));

    let stale = store
        .list(&DeviceFilter {
            stale_only: true,
            ..Default::default()
        })
        .await
        .expect("list stale");
    assert!(stale.iter().any(|d| d.hostname.as_deref() == Some("dev1")));
    assert!(!stale.iter().any(|d| d.hostname.as_deref() == Some("svc1")));
}

#[tokio::test]
async fn record_and_forget_service_round_trips() {
    let (store, _dir) = open_store().await;
    let (id, _, _) = store
        .upsert(DeviceUpsert {
            hostname: Some("svc-host".into()),
            ..Default::default()
        })
        .await
        .expect("create");

    store
        .record_service(
            id,
            homelab_mcp::store::model::InstalledService {
                service_name: "pihole".into(),
                version: Some("1.0".into()),
                method: homelab_mcp::store::model::InstallMethod::DockerCompose,
                ports: vec![53, 80],
                config_digest: "abc123".into(),
                installed_at: chrono::Utc::now(),
                health: homelab_mcp::store::model::ServiceHealth::Healthy,
                deployment_dir: Some("/srv/pihole".into()),
            },
        )
        .await
        .expect("record service");

    let device = store.get(id).await.expect("get").expect("present");
    assert_eq!(device.services.len(), 1);
    assert_eq!(device.services[0].service_name, "pihole");

    store.forget_service(id, "pihole").await.expect("forget service");
    let device = store.get(id).await.expect("get").expect("present");
    assert!(device.services.is_empty());
}
