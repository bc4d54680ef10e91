use tunnel_scan_rs::settings::{HostSettingsSnapshot, ServiceState, SnapshotStore, StartType};

#[tokio::test]
async fn snapshot_round_trips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("settings.json"));
    let captured = HostSettingsSnapshot {
        wmi: ServiceState::Stopped,
        remote_registry: ServiceState::Running,
        remote_registry_start: StartType::Auto,
        file_sharing_enabled: true,
        local_account_token_filter_policy: Some(1),
        captured_at: "2026-10-18T09:30:00Z".into(),
    };

    store.save(&captured).await.expect("save");
    let reloaded = store.load().await.expect("load");
    assert_eq!(reloaded, captured);
}

#[tokio::test]
async fn snapshot_file_is_plain_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SnapshotStore::new(&path);
    let captured = HostSettingsSnapshot {
        wmi: ServiceState::Running,
        remote_registry: ServiceState::Stopped,
        remote_registry_start: StartType::Disabled,
        file_sharing_enabled: false,
        local_account_token_filter_policy: None,
        captured_at: "2026-10-18T09:30:00Z".into(),
    };
    store.save(&captured).await.unwrap();

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["wmi"], "running");
    assert_eq!(raw["remote_registry_start"], "disabled");
    assert!(raw["local_account_token_filter_policy"].is_null());
}

#[tokio::test]
async fn missing_snapshot_is_settings_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("absent.json"));
    assert!(store.load().await.is_err());
}
