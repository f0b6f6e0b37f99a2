//! Catalog
//!
//! Workspaces, stores, resources, layers, styles and friends, kept in
//! memory and observed by [`CatalogListener`]s. Listener failures abort
//! the mutation that triggered them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::property::{PropertyError, Tracked};

/// Directory under the data dir holding style documents
pub const STYLES_DIR: &str = "styles";

/// Catalog error types
#[derive(Debug)]
pub enum CatalogError {
    /// No object with this id
    NotFound(String),
    /// An object with this id already exists
    Duplicate(String),
    /// A listener rejected the mutation
    Listener(String),
    /// Property assignment failed
    Property(PropertyError),
    /// IO error touching catalog resources
    Io(std::io::Error),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::NotFound(id) => write!(f, "Catalog object not found: {}", id),
            CatalogError::Duplicate(id) => write!(f, "Catalog object already exists: {}", id),
            CatalogError::Listener(msg) => write!(f, "Catalog listener error: {}", msg),
            CatalogError::Property(e) => write!(f, "Property error: {}", e),
            CatalogError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Property(e) => Some(e),
            CatalogError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PropertyError> for CatalogError {
    fn from(e: PropertyError) -> Self {
        CatalogError::Property(e)
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        CatalogError::Io(e)
    }
}

/// Kind of catalog object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Workspace,
    Namespace,
    Store,
    Resource,
    Layer,
    LayerGroup,
    Style,
    Map,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Workspace => "workspace",
            CatalogKind::Namespace => "namespace",
            CatalogKind::Store => "store",
            CatalogKind::Resource => "resource",
            CatalogKind::Layer => "layer",
            CatalogKind::LayerGroup => "layergroup",
            CatalogKind::Style => "style",
            CatalogKind::Map => "map",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogInfo {
    pub id: String,
    pub kind: CatalogKind,
    pub name: String,
    #[serde(default)]
    pub workspace: Option<String>,
    /// Style document file name, relative to the styles directory
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl CatalogInfo {
    /// Create an enabled object with no extra properties
    pub fn new(id: impl Into<String>, kind: CatalogKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            workspace: None,
            filename: None,
            enabled: true,
            properties: BTreeMap::new(),
        }
    }

    /// Create a style backed by a document in the styles directory
    pub fn style(id: impl Into<String>, name: impl Into<String>, filename: impl Into<String>) -> Self {
        let mut info = Self::new(id, CatalogKind::Style, name);
        info.filename = Some(filename.into());
        info
    }

    /// Set the owning workspace
    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set a free-form property
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Data-dir relative path of the style document, for styles
    pub fn style_document(&self) -> Option<String> {
        match (self.kind, &self.filename) {
            (CatalogKind::Style, Some(filename)) => Some(format!("{}/{}", STYLES_DIR, filename)),
            _ => None,
        }
    }
}

/// Observer of catalog mutations
///
/// Returning an error from an add/remove/modify callback aborts the
/// mutation and surfaces the error to the caller.
#[async_trait]
pub trait CatalogListener: Send + Sync {
    async fn handle_add(&self, _info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        Ok(())
    }

    async fn handle_remove(&self, _info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        Ok(())
    }

    async fn handle_modify(&self, _info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        Ok(())
    }

    async fn handle_post_modify(&self, _info: &CatalogInfo) -> Result<(), CatalogError> {
        Ok(())
    }

    /// Called after the catalog was reloaded
    async fn reloaded(&self) {}
}

/// In-memory catalog
pub struct Catalog {
    data_dir: PathBuf,
    objects: RwLock<BTreeMap<String, CatalogInfo>>,
    listeners: RwLock<Vec<Arc<dyn CatalogListener>>>,
}

impl Catalog {
    /// Create an empty catalog rooted at a data dir
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            objects: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Data directory root
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Register a catalog listener
    pub fn add_listener(&self, listener: Arc<dyn CatalogListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a listener previously added with [`add_listener`](Self::add_listener)
    pub fn remove_listener(&self, listener: &Arc<dyn CatalogListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .write()
            .retain(|l| Arc::as_ptr(l) as *const () != target);
    }

    fn listeners(&self) -> Vec<Arc<dyn CatalogListener>> {
        self.listeners.read().clone()
    }

    /// Look up an object by id
    pub fn get(&self, id: &str) -> Option<CatalogInfo> {
        self.objects.read().get(id).cloned()
    }

    /// Look up an object by kind and name
    pub fn get_by_name(&self, kind: CatalogKind, name: &str) -> Option<CatalogInfo> {
        self.objects
            .read()
            .values()
            .find(|o| o.kind == kind && o.name == name)
            .cloned()
    }

    /// Whether an object with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.objects.read().contains_key(id)
    }

    /// All objects of a kind
    pub fn list(&self, kind: CatalogKind) -> Vec<CatalogInfo> {
        self.objects
            .read()
            .values()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True when the catalog holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Absolute path of a data-dir relative document
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(relative)
    }

    /// Add an object
    ///
    /// The object is visible to listeners while they run; a failing
    /// listener rolls the insertion back.
    pub async fn add(&self, info: CatalogInfo) -> Result<(), CatalogError> {
        {
            let mut objects = self.objects.write();
            if objects.contains_key(&info.id) {
                return Err(CatalogError::Duplicate(info.id));
            }
            objects.insert(info.id.clone(), info.clone());
        }
        debug!("Catalog: added {} '{}'", info.kind, info.name);

        let tracked = Tracked::new(info);
        for listener in self.listeners() {
            if let Err(e) = listener.handle_add(&tracked).await {
                warn!(
                    "Catalog: rolling back add of '{}': {}",
                    tracked.current().id,
                    e
                );
                self.objects.write().remove(&tracked.current().id);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove an object by id
    ///
    /// A failing listener puts the object back.
    pub async fn remove(&self, id: &str) -> Result<CatalogInfo, CatalogError> {
        let removed = self
            .objects
            .write()
            .remove(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        debug!("Catalog: removed {} '{}'", removed.kind, removed.name);

        let tracked = Tracked::new(removed);
        for listener in self.listeners() {
            if let Err(e) = listener.handle_remove(&tracked).await {
                warn!("Catalog: rolling back remove of '{}': {}", id, e);
                let info = tracked.into_inner();
                self.objects.write().insert(info.id.clone(), info);
                return Err(e);
            }
        }
        Ok(tracked.into_inner())
    }

    /// Start editing an object
    pub fn edit(&self, id: &str) -> Result<Tracked<CatalogInfo>, CatalogError> {
        self.get(id)
            .map(Tracked::new)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Commit an edit
    ///
    /// Modify listeners run before the change is committed and may veto
    /// it; post-modify listeners run afterwards.
    pub async fn save(&self, edit: Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        let id = edit.original().id.clone();
        if !self.contains(&id) {
            return Err(CatalogError::NotFound(id));
        }
        if edit.current().id != id {
            return Err(CatalogError::Listener(format!(
                "object id cannot change ({} -> {})",
                id,
                edit.current().id
            )));
        }

        for listener in self.listeners() {
            listener.handle_modify(&edit).await?;
        }

        let committed = edit.into_inner();
        self.objects.write().insert(id, committed.clone());
        debug!("Catalog: saved {} '{}'", committed.kind, committed.name);

        self.fire_post_modified(&committed).await
    }

    /// Notify listeners that an object modification was committed
    pub async fn fire_post_modified(&self, info: &CatalogInfo) -> Result<(), CatalogError> {
        for listener in self.listeners() {
            listener.handle_post_modify(info).await?;
        }
        Ok(())
    }

    /// Delete the document backing a style, if any
    pub async fn delete_style_document(&self, info: &CatalogInfo) -> Result<bool, CatalogError> {
        let Some(relative) = info.style_document() else {
            return Ok(false);
        };
        let path = self.resolve(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Catalog: purged style document {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CatalogError::Io(e)),
        }
    }

    /// Insert previously persisted objects without notifying listeners
    pub fn restore(&self, objects: Vec<CatalogInfo>) {
        let mut map = self.objects.write();
        for info in objects {
            map.insert(info.id.clone(), info);
        }
    }

    /// Notify listeners that the catalog was reloaded
    pub async fn fire_reloaded(&self) {
        for listener in self.listeners() {
            listener.reloaded().await;
        }
    }
}
