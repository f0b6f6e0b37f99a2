//! Member wiring tests

use std::path::Path;

use pretty_assertions::assert_eq;

use super::*;
use crate::configuration::MapOverrides;
use crate::model::{CatalogInfo, CatalogKind};
use crate::transport::MemoryHub;

fn overrides() -> Arc<dyn OverrideSource> {
    Arc::new(MapOverrides::new().with(keys::CONNECTION_MAXWAIT, "5"))
}

fn seed(data_dir: &Path, entries: &[(&str, &str)]) {
    let configuration = ClusterConfiguration::new(data_dir.join("cluster"), overrides());
    configuration.init().unwrap();
    for (key, value) in entries {
        configuration.put(*key, *value);
    }
    configuration.store().unwrap();
}

async fn start(data_dir: &Path, hub: &Arc<MemoryHub>, name: &str) -> ClusterNode {
    ClusterNode::builder(data_dir)
        .with_overrides(overrides())
        .with_instance_name(name)
        .with_transport(Arc::new(hub.transport(name)))
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_start_connects_and_enables_toggles() {
    let dir = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();
    let node = start(dir.path(), &hub, "gs-1").await;

    assert_eq!(node.instance_name(), "gs-1");
    assert!(node.connection().is_connected());
    assert!(node.producer().is_enabled());
    assert!(node.consumer_toggle().is_enabled());
    assert!(node.persistence().is_attached());
    assert_eq!(hub.subscriber_count(&node.configuration().topic_name()), 1);
    assert!(dir.path().join("cluster").join("cluster.properties").exists());

    node.shutdown().await;
    assert!(!node.connection().is_running());
    assert_eq!(hub.subscriber_count(&node.configuration().topic_name()), 0);
    node.shutdown().await;
}

#[tokio::test]
async fn test_persisted_toggles_are_applied_after_startup() {
    let dir = tempfile::tempdir().unwrap();
    seed(
        dir.path(),
        &[(keys::TOGGLE_MASTER, "false"), (keys::TOGGLE_SLAVE, "true")],
    );
    let hub = MemoryHub::new();
    let node = start(dir.path(), &hub, "gs-1").await;

    assert!(!node.producer().is_enabled());
    assert!(node.consumer_toggle().is_enabled());
    node.shutdown().await;
}

#[tokio::test]
async fn test_malformed_setting_does_not_stop_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cluster")).unwrap();
    std::fs::write(
        dir.path().join("cluster").join("cluster.properties"),
        "toggleMaster=false\nreadOnly=\\uZZZZ\n",
    )
    .unwrap();
    let hub = MemoryHub::new();
    let node = start(dir.path(), &hub, "gs-1").await;

    assert!(!node.configuration().read_only());
    assert!(node.persistence().is_attached());
    assert!(!node.producer().is_enabled());
    assert!(node.connection().is_connected());
    node.shutdown().await;
}

#[tokio::test]
async fn test_read_only_member_keeps_changes_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path(), &[(keys::READ_ONLY, keys::ENABLED)]);
    let hub = MemoryHub::new();
    let node = start(dir.path(), &hub, "gs-1").await;
    assert!(!node.persistence().is_attached());

    node.catalog()
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "topp"))
        .await
        .unwrap();
    assert!(node.catalog().contains("ws1"));
    assert!(!dir.path().join("catalog").exists());
    node.shutdown().await;
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();

    let node = start(dir.path(), &hub, "gs-1").await;
    node.catalog()
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "topp"))
        .await
        .unwrap();
    let mut edit = node.geoserver().edit_logging();
    edit.set("level", "DEBUG").unwrap();
    node.geoserver().save_logging(edit).await;
    node.shutdown().await;

    let restarted = start(dir.path(), &hub, "gs-1").await;
    assert!(restarted.catalog().contains("ws1"));
    assert_eq!(restarted.geoserver().logging().level, "DEBUG");
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_broker_downgrades_connection_flag() {
    let dir = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();
    hub.set_available(false);

    let node = start(dir.path(), &hub, "gs-1").await;
    assert!(!node.connection().is_running());
    assert!(!node.configuration().connection_enabled());

    let reloaded = ClusterConfiguration::new(dir.path().join("cluster"), overrides());
    assert!(reloaded.load().unwrap());
    assert!(!reloaded.connection_enabled());
    node.shutdown().await;
}

#[tokio::test]
async fn test_disabled_connection_is_not_attempted() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path(), &[(keys::CONNECTION, keys::DISABLED)]);
    let hub = MemoryHub::new();
    let node = start(dir.path(), &hub, "gs-1").await;

    assert!(!node.connection().is_running());
    node.controller().connect_client(true).await.unwrap();
    assert!(node.connection().is_connected());
    assert!(node.configuration().connection_enabled());
    node.shutdown().await;
}
