//! Model module tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

#[test]
fn test_get_and_set_nested_property() {
    let mut global = GlobalSettings::default();
    assert_eq!(global.get_property("charset").unwrap(), json!("UTF-8"));

    global
        .set_property("contact.person", &json!("Alice"))
        .unwrap();
    assert_eq!(global.contact.person.as_deref(), Some("Alice"));
    assert_eq!(global.get_property("contact.person").unwrap(), json!("Alice"));
}

#[test]
fn test_set_unknown_property_fails() {
    let mut logging = LoggingSettings::default();
    let err = logging.set_property("colour", &json!("red")).unwrap_err();
    assert!(matches!(err, PropertyError::Unknown(name) if name == "colour"));
}

#[test]
fn test_set_property_with_wrong_type_leaves_object_untouched() {
    let mut global = GlobalSettings::default();
    let err = global
        .set_property("numDecimals", &json!("many"))
        .unwrap_err();
    assert!(matches!(err, PropertyError::InvalidValue { .. }));
    assert_eq!(global.num_decimals, 4);
}

#[test]
fn test_tracked_records_diff() {
    let mut edit = Tracked::new(LoggingSettings::default());
    assert!(edit.is_unchanged());

    edit.set("level", "DEBUG").unwrap();
    edit.set("level", "TRACE").unwrap();
    edit.set("stdoutLogging", false).unwrap();

    let diff = edit.diff();
    assert_eq!(diff.names(), &["level".to_string(), "stdoutLogging".to_string()]);
    assert_eq!(diff.old_values(), &[json!("INFO"), json!(true)]);
    assert_eq!(diff.new_values(), &[json!("TRACE"), json!(false)]);
    assert_eq!(edit.original().level, "INFO");
    assert_eq!(edit.canonical().level, "TRACE");
}

#[test]
fn test_apply_diff_replays_changes() {
    let mut source = Tracked::new(GlobalSettings::default());
    source.set("verbose", true).unwrap();
    source.set("onlineResource", "http://example.com").unwrap();

    let mut target = GlobalSettings::default();
    target.apply_diff(source.diff()).unwrap();
    assert!(target.verbose);
    assert_eq!(target.online_resource.as_deref(), Some("http://example.com"));
}

#[test]
fn test_style_document_path() {
    let style = CatalogInfo::style("s1", "roads", "roads.sld");
    assert_eq!(style.style_document().as_deref(), Some("styles/roads.sld"));

    let layer = CatalogInfo::new("l1", CatalogKind::Layer, "roads");
    assert_eq!(layer.style_document(), None);
}

/// Records every callback and optionally rejects mutations
#[derive(Default)]
struct RecordingListener {
    calls: Mutex<Vec<String>>,
    reject: bool,
}

impl RecordingListener {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn outcome(&self) -> Result<(), CatalogError> {
        if self.reject {
            Err(CatalogError::Listener("rejected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogListener for RecordingListener {
    async fn handle_add(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        self.calls.lock().push(format!("add:{}", info.current().id));
        self.outcome()
    }

    async fn handle_remove(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        self.calls.lock().push(format!("remove:{}", info.current().id));
        self.outcome()
    }

    async fn handle_modify(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        self.calls
            .lock()
            .push(format!("modify:{}:{}", info.current().id, info.diff().len()));
        self.outcome()
    }

    async fn handle_post_modify(&self, info: &CatalogInfo) -> Result<(), CatalogError> {
        self.calls.lock().push(format!("post:{}", info.id));
        Ok(())
    }
}

#[tokio::test]
async fn test_catalog_add_get_remove() {
    let catalog = Catalog::new("/tmp/unused");
    let listener = Arc::new(RecordingListener::default());
    catalog.add_listener(listener.clone());

    catalog
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "topp"))
        .await
        .unwrap();
    assert!(catalog.contains("ws1"));
    assert_eq!(
        catalog.get_by_name(CatalogKind::Workspace, "topp").map(|i| i.id),
        Some("ws1".to_string())
    );

    let err = catalog
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Duplicate(_)));

    let removed = catalog.remove("ws1").await.unwrap();
    assert_eq!(removed.name, "topp");
    assert!(catalog.is_empty());
    assert_eq!(listener.calls(), vec!["add:ws1", "remove:ws1"]);
}

#[tokio::test]
async fn test_catalog_rolls_back_rejected_add() {
    let catalog = Catalog::new("/tmp/unused");
    catalog.add_listener(Arc::new(RecordingListener::rejecting()));

    let result = catalog
        .add(CatalogInfo::new("l1", CatalogKind::Layer, "roads"))
        .await;
    assert!(matches!(result, Err(CatalogError::Listener(_))));
    assert!(!catalog.contains("l1"));
}

#[tokio::test]
async fn test_catalog_rolls_back_rejected_remove() {
    let catalog = Catalog::new("/tmp/unused");
    catalog
        .add(CatalogInfo::new("l1", CatalogKind::Layer, "roads"))
        .await
        .unwrap();
    catalog.add_listener(Arc::new(RecordingListener::rejecting()));

    assert!(catalog.remove("l1").await.is_err());
    assert!(catalog.contains("l1"));
}

#[tokio::test]
async fn test_catalog_save_fires_modify_then_post_modify() {
    let catalog = Catalog::new("/tmp/unused");
    catalog
        .add(CatalogInfo::new("l1", CatalogKind::Layer, "roads"))
        .await
        .unwrap();
    let listener = Arc::new(RecordingListener::default());
    catalog.add_listener(listener.clone());

    let mut edit = catalog.edit("l1").unwrap();
    edit.set("enabled", false).unwrap();
    catalog.save(edit).await.unwrap();

    assert!(!catalog.get("l1").unwrap().enabled);
    assert_eq!(listener.calls(), vec!["modify:l1:1", "post:l1"]);
}

#[tokio::test]
async fn test_catalog_rejected_save_is_not_committed() {
    let catalog = Catalog::new("/tmp/unused");
    catalog
        .add(CatalogInfo::new("l1", CatalogKind::Layer, "roads"))
        .await
        .unwrap();
    let listener = Arc::new(RecordingListener::rejecting());
    catalog.add_listener(listener.clone());

    let mut edit = catalog.edit("l1").unwrap();
    edit.set("name", "streets").unwrap();
    assert!(catalog.save(edit).await.is_err());

    assert_eq!(catalog.get("l1").unwrap().name, "roads");
    assert_eq!(listener.calls(), vec!["modify:l1:1"]);
}

#[tokio::test]
async fn test_catalog_remove_listener() {
    let catalog = Catalog::new("/tmp/unused");
    let listener: Arc<dyn CatalogListener> = Arc::new(RecordingListener::rejecting());
    catalog.add_listener(listener.clone());
    catalog.remove_listener(&listener);

    catalog
        .add(CatalogInfo::new("l1", CatalogKind::Layer, "roads"))
        .await
        .unwrap();
}

#[derive(Default)]
struct CountingConfigListener {
    changes: AtomicUsize,
    post_changes: AtomicUsize,
    last_diff_len: AtomicUsize,
}

#[async_trait]
impl ConfigurationListener for CountingConfigListener {
    async fn handle_logging_change(&self, logging: &Tracked<LoggingSettings>) {
        self.changes.fetch_add(1, Ordering::SeqCst);
        self.last_diff_len
            .store(logging.diff().len(), Ordering::SeqCst);
    }

    async fn handle_post_logging_change(&self, _logging: &LoggingSettings) {
        self.post_changes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_geoserver_save_logging_notifies_listeners() {
    let geoserver = GeoServer::new("/tmp/unused");
    let listener = Arc::new(CountingConfigListener::default());
    geoserver.add_listener(listener.clone());
    assert_eq!(geoserver.listener_count(), 1);

    let mut edit = geoserver.edit_logging();
    edit.set("level", "DEBUG").unwrap();
    geoserver.save_logging(edit).await;

    assert_eq!(geoserver.logging().level, "DEBUG");
    assert_eq!(listener.changes.load(Ordering::SeqCst), 1);
    assert_eq!(listener.post_changes.load(Ordering::SeqCst), 1);
    assert_eq!(listener.last_diff_len.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_geoserver_services() {
    let geoserver = GeoServer::new("/tmp/unused");
    geoserver
        .add_service(ServiceSettings::new("wms-1", "WMS"))
        .await
        .unwrap();
    assert!(matches!(
        geoserver.add_service(ServiceSettings::new("wms-1", "WMS")).await,
        Err(SettingsError::DuplicateService(_))
    ));
    assert!(geoserver.service_by_name("wms", None).is_some());
    assert!(geoserver.service_by_name("wms", Some("topp")).is_none());

    let mut edit = geoserver.edit_service("wms-1").unwrap();
    edit.set("title", "Maps").unwrap();
    geoserver.save_service(edit).await.unwrap();
    assert_eq!(
        geoserver.service("wms-1").unwrap().title.as_deref(),
        Some("Maps")
    );

    geoserver.remove_service("wms-1").await.unwrap();
    assert!(geoserver.services().is_empty());
}

#[test]
fn test_write_atomic_replaces_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("file.txt");

    write_atomic(&path, b"first").unwrap();
    write_atomic(&path, b"second").unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"second");
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_persister_writes_and_loads_state() {
    let dir = tempfile::tempdir().unwrap();
    let persister = Arc::new(DataDirPersister::new(dir.path()));

    let geoserver = GeoServer::new(dir.path());
    geoserver.add_listener(persister.clone());
    let catalog = Catalog::new(dir.path());
    catalog.add_listener(persister.clone());

    let mut edit = geoserver.edit_logging();
    edit.set("level", "WARN").unwrap();
    geoserver.save_logging(edit).await;
    geoserver
        .add_service(ServiceSettings::new("wms-1", "WMS"))
        .await
        .unwrap();

    catalog
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "topp"))
        .await
        .unwrap();
    catalog
        .add(CatalogInfo::new("l1", CatalogKind::Layer, "roads"))
        .await
        .unwrap();
    catalog.remove("l1").await.unwrap();

    let snapshot = persister.load().unwrap();
    assert_eq!(snapshot.logging.map(|l| l.level), Some("WARN".to_string()));
    assert!(snapshot.global.is_none());
    assert_eq!(snapshot.services.len(), 1);
    assert_eq!(snapshot.services[0].id, "wms-1");
    assert_eq!(snapshot.catalog.len(), 1);
    assert_eq!(snapshot.catalog[0].id, "ws1");

    let restored = Catalog::new(dir.path());
    restored.restore(snapshot.catalog);
    assert!(restored.contains("ws1"));
}

#[tokio::test]
async fn test_persistence_switch_detaches_for_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(Catalog::new(dir.path()));
    let geoserver = Arc::new(GeoServer::new(dir.path()));
    let switch = PersistenceSwitch::new(
        Arc::new(DataDirPersister::new(dir.path())),
        catalog.clone(),
        geoserver.clone(),
    );
    assert!(!switch.is_attached());

    switch.set_read_only(false);
    switch.attach();
    assert!(switch.is_attached());
    assert_eq!(geoserver.listener_count(), 1);
    catalog
        .add(CatalogInfo::new("ws1", CatalogKind::Workspace, "topp"))
        .await
        .unwrap();

    switch.set_read_only(true);
    assert!(!switch.is_attached());
    assert_eq!(geoserver.listener_count(), 0);
    catalog
        .add(CatalogInfo::new("ws2", CatalogKind::Workspace, "sf"))
        .await
        .unwrap();

    let ids: Vec<_> = switch
        .persister()
        .load()
        .unwrap()
        .catalog
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["ws1".to_string()]);
}
