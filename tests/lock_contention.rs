//! The store lock serialises mutating operations: a concurrent install
//! against an already-held lock fails fast with `LockBusy`, and a stale
//! sentinel is stolen rather than waited out forever.

use std::time::Duration;

use pluginvault::{PluginError, PluginManager, PluginManagerOptions};

async fn write_fixture(dir: &std::path::Path) {
    tokio::fs::create_dir_all(dir).await.unwrap();
    tokio::fs::write(dir.join("package.json"), r#"{"name":"locked","version":"1.0.0"}"#).await.unwrap();
    tokio::fs::write(dir.join("index.js"), "module.exports = {};").await.unwrap();
}

#[tokio::test]
async fn install_fails_with_lock_busy_while_another_holder_is_live() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = tmp.path().join("fixtures/locked");
    write_fixture(&fixture).await;

    let plugins_path = tmp.path().join("plugins");
    tokio::fs::create_dir_all(&plugins_path).await.unwrap();
    let sentinel = plugins_path.join(".pluginvault.lock");
    tokio::fs::write(&sentinel, std::process::id().to_string()).await.unwrap();

    let options = PluginManagerOptions::default()
        .with_plugins_path(plugins_path.clone())
        .with_versions_path(plugins_path.join(".versions"));
    let mut manager = PluginManager::new(options);

    let result = manager.install_from_path("locked", fixture.to_str().unwrap(), false).await;
    assert!(matches!(result, Err(PluginError::LockBusy { .. })));

    tokio::fs::remove_file(&sentinel).await.unwrap();
}

#[tokio::test]
async fn install_succeeds_once_a_stale_sentinel_is_stolen() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = tmp.path().join("fixtures/locked");
    write_fixture(&fixture).await;

    let plugins_path = tmp.path().join("plugins");
    tokio::fs::create_dir_all(&plugins_path).await.unwrap();
    let sentinel = plugins_path.join(".pluginvault.lock");
    tokio::fs::write(&sentinel, "99999999").await.unwrap();
    let stale_time = std::time::SystemTime::now() - Duration::from_secs(3600);
    std::fs::OpenOptions::new().write(true).open(&sentinel).unwrap().set_modified(stale_time).unwrap();

    let options = PluginManagerOptions {
        lock_wait: Duration::from_millis(500),
        lock_stale: Duration::from_millis(50),
        ..PluginManagerOptions::default()
            .with_plugins_path(plugins_path.clone())
            .with_versions_path(plugins_path.join(".versions"))
    };
    let mut manager = PluginManager::new(options);

    manager.install_from_path("locked", fixture.to_str().unwrap(), false).await.unwrap();
}
