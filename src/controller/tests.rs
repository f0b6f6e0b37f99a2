//! Controller tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use super::*;
use crate::configuration::MapOverrides;
use crate::connection::RetryPolicy;
use crate::model::{Catalog, DataDirPersister, GeoServer};
use crate::toggle::ToggleSwitch;
use crate::transport::MemoryHub;

struct Fixture {
    controller: Controller,
    configuration: Arc<ClusterConfiguration>,
    hub: Arc<MemoryHub>,
    producer: Arc<ToggleSwitch>,
    consumer: Arc<ToggleSwitch>,
    persistence: Arc<PersistenceSwitch>,
    dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let configuration = Arc::new(ClusterConfiguration::new(
        dir.path().join("cluster"),
        Arc::new(MapOverrides::new()),
    ));
    configuration.init().unwrap();

    let lifecycle = Arc::new(Lifecycle::new());
    let producer = Arc::new(ToggleSwitch::new(ToggleType::Producer));
    let consumer = Arc::new(ToggleSwitch::new(ToggleType::Consumer));
    lifecycle.subscribe(producer.clone());
    lifecycle.subscribe(consumer.clone());
    lifecycle.publish(ApplicationEvent::ContextLoaded);

    let hub = MemoryHub::new();
    let (tx, _rx) = mpsc::channel(1);
    let connection = Arc::new(ConnectionManager::with_policy(
        Arc::new(hub.transport("member")),
        configuration.clone(),
        tx,
        RetryPolicy::new(2, Duration::from_millis(5)),
    ));

    let catalog = Arc::new(Catalog::new(dir.path()));
    let geoserver = Arc::new(GeoServer::new(dir.path()));
    let persistence = Arc::new(PersistenceSwitch::new(
        Arc::new(DataDirPersister::new(dir.path())),
        catalog,
        geoserver,
    ));
    persistence.attach();

    Fixture {
        controller: Controller::new(
            configuration.clone(),
            lifecycle,
            connection,
            persistence.clone(),
        ),
        configuration,
        hub,
        producer,
        consumer,
        persistence,
        dir,
    }
}

fn reload(f: &Fixture) -> ClusterConfiguration {
    let reloaded = ClusterConfiguration::new(
        f.dir.path().join("cluster"),
        Arc::new(MapOverrides::new()),
    );
    assert!(reloaded.load().unwrap());
    reloaded
}

#[test]
fn test_setters_update_configuration() {
    let f = fixture();
    assert_ok!(f.controller.set_instance_name("node-7"));
    assert_ok!(f.controller.set_broker_url("tcp://broker:61616"));
    assert_ok!(f.controller.set_config_dir("/etc/cluster"));

    assert_eq!(f.configuration.instance_name(), "node-7");
    assert_eq!(f.configuration.broker_url(), "tcp://broker:61616");
    assert_eq!(
        f.configuration.get(keys::CONFIG_DIR).as_deref(),
        Some("/etc/cluster")
    );
}

#[test]
fn test_setters_reject_bad_input() {
    let f = fixture();
    assert!(matches!(
        f.controller.set_instance_name("  "),
        Err(ControllerError::Invalid(_))
    ));
    assert!(matches!(
        f.controller.set_broker_url("http://broker"),
        Err(ControllerError::Invalid(_))
    ));
    assert!(matches!(
        f.controller.set_config_dir(""),
        Err(ControllerError::Invalid(_))
    ));
}

#[test]
fn test_changes_persist_only_after_save() {
    let f = fixture();
    f.controller.set_instance_name("node-7").unwrap();
    assert_ne!(reload(&f).instance_name(), "node-7");

    f.controller.save().unwrap();
    assert_eq!(reload(&f).instance_name(), "node-7");
}

#[test]
fn test_toggle_producer_and_consumer() {
    let f = fixture();
    assert!(f.producer.is_enabled());
    assert!(f.consumer.is_enabled());

    f.controller.toggle(false, ToggleType::Producer);
    assert!(!f.producer.is_enabled());
    assert!(f.consumer.is_enabled());
    assert!(!f.configuration.toggle_master());
    assert!(f.configuration.toggle_slave());

    f.controller.toggle(false, ToggleType::Consumer);
    assert!(!f.consumer.is_enabled());
    assert!(!f.configuration.toggle_slave());

    f.controller.toggle(true, ToggleType::Producer);
    assert!(f.producer.is_enabled());
    assert!(f.configuration.toggle_master());
}

#[test]
fn test_read_only_detaches_persister() {
    let f = fixture();
    f.controller.set_read_only(true);
    assert!(!f.persistence.is_attached());
    assert!(f.configuration.read_only());

    f.controller.set_read_only(false);
    assert!(f.persistence.is_attached());
    assert!(!f.configuration.read_only());
}

#[tokio::test]
async fn test_connect_and_disconnect_client() {
    let f = fixture();
    f.configuration.put(keys::CONNECTION, keys::DISABLED);

    f.controller.connect_client(true).await.unwrap();
    assert!(f.configuration.connection_enabled());
    // already connected
    f.controller.connect_client(true).await.unwrap();

    f.controller.connect_client(false).await.unwrap();
    assert!(!f.configuration.connection_enabled());
    f.controller.connect_client(false).await.unwrap();
}

#[tokio::test]
async fn test_failed_connect_is_an_error() {
    let f = fixture();
    f.hub.set_accepting(false);

    let err = f.controller.connect_client(true).await.unwrap_err();
    assert!(matches!(err, ControllerError::Connection(_)));
    assert!(!f.configuration.connection_enabled());
}
