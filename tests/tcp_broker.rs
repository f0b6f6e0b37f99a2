//! Integration Tests over the embedded relay broker
//!
//! Members build their TCP transport from `brokerURL` and replicate
//! through a broker listening on an ephemeral local port.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clustersync::broker::{Broker, BrokerConfig, BrokerRole, BrokerService};
use clustersync::configuration::{keys, MapOverrides};
use clustersync::model::{CatalogInfo, CatalogKind};
use clustersync::node::ClusterNode;

async fn broker(role: BrokerRole) -> Broker {
    let broker = Broker::new(BrokerConfig {
        broker_id: "it-broker".to_string(),
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        role,
    });
    broker.start().await.unwrap();
    broker
}

async fn member(dir: &Path, broker_url: &str, name: &str) -> ClusterNode {
    let overrides = MapOverrides::new()
        .with(keys::BROKER_URL, broker_url)
        .with(keys::CONNECTION_RETRY, "50")
        .with(keys::CONNECTION_MAXWAIT, "50");
    ClusterNode::builder(dir)
        .with_overrides(Arc::new(overrides))
        .with_instance_name(name)
        .with_connect_timeout(Duration::from_secs(2))
        .start()
        .await
        .unwrap()
}

async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_members_replicate_through_broker() {
    let broker = broker(BrokerRole::Master).await;
    let url = broker.url().unwrap();
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let a = member(dir_a.path(), &url, "gs-a").await;
    let b = member(dir_b.path(), &url, "gs-b").await;
    assert!(a.connection().is_connected());
    assert!(b.connection().is_connected());
    let topic = a.configuration().topic_name();
    assert_eq!(broker.subscriber_count(&topic), 2);

    let mut edit = a.geoserver().edit_logging();
    edit.set("level", "DEBUG").unwrap();
    a.geoserver().save_logging(edit).await;
    eventually(|| b.geoserver().logging().level == "DEBUG").await;

    b.catalog()
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "topp"))
        .await
        .unwrap();
    eventually(|| a.catalog().contains("ws1")).await;
    eventually(|| broker.relayed() == 2).await;

    a.shutdown().await;
    b.shutdown().await;
    eventually(|| broker.subscriber_count(&topic) == 0).await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_slave_broker_leaves_member_disconnected() {
    let broker = broker(BrokerRole::Slave).await;
    let url = broker.url().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let overrides = MapOverrides::new()
        .with(keys::BROKER_URL, url.as_str())
        .with(keys::CONNECTION_RETRY, "3")
        .with(keys::CONNECTION_MAXWAIT, "20");
    let node = ClusterNode::builder(dir.path())
        .with_overrides(Arc::new(overrides))
        .with_instance_name("gs-a")
        .start()
        .await
        .unwrap();

    assert!(!node.connection().is_running());
    assert!(!node.configuration().connection_enabled());
    node.shutdown().await;
    broker.stop().await.unwrap();
}
