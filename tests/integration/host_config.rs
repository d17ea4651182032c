//! Configuration and permission wiring as the host binary uses them.

use bgrunner::permissions::PermissionKind;
use bgrunner::platform::PermissionChecker;
use bgrunner::RunnerConfig;

#[test]
fn config_permissions_drive_the_live_checker() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = RunnerConfig::default();
    config.permissions.revoke(PermissionKind::ExactAlarm);
    config.storage.options_path = Some(dir.path().join("opts.json"));
    config.save_to_file(&path).unwrap();

    let loaded = RunnerConfig::load_or_default(&path).unwrap();
    let shared = loaded.permissions.clone().into_shared();
    assert!(shared.has_status_permission());
    assert!(!shared.has_exact_schedule_permission());

    shared.lock().unwrap().grant(PermissionKind::ExactAlarm);
    assert!(shared.has_exact_schedule_permission());
    assert_eq!(
        loaded.storage.effective_options_path(),
        dir.path().join("opts.json")
    );
}

#[tokio::test]
async fn local_platform_wires_on_a_runtime() {
    let (fire_tx, _fire_rx) = tokio::sync::mpsc::unbounded_channel();
    let (restart_tx, _restart_rx) = tokio::sync::mpsc::unbounded_channel();
    let permissions = RunnerConfig::default().permissions.into_shared();
    let platform = bgrunner::platform::local::platform(permissions, fire_tx, restart_tx).unwrap();
    assert!(platform.permissions.has_status_permission());
    assert!(!platform.permissions.is_battery_optimization_ignored());
}
