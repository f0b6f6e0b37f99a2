//! Server Settings
//!
//! Global, logging and per-service settings objects plus the
//! [`GeoServer`] facade that owns them and notifies configuration
//! listeners on every committed change.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::property::{PropertyError, Tracked};

/// Settings model error types
#[derive(Debug)]
pub enum SettingsError {
    /// No service with this id or name
    ServiceNotFound(String),
    /// A service with this id already exists
    DuplicateService(String),
    /// The edited object no longer matches the stored one
    Stale(String),
    /// Property assignment failed
    Property(PropertyError),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::ServiceNotFound(id) => write!(f, "Service not found: {}", id),
            SettingsError::DuplicateService(id) => write!(f, "Service already exists: {}", id),
            SettingsError::Stale(id) => write!(f, "Stale edit for: {}", id),
            SettingsError::Property(e) => write!(f, "Property error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<PropertyError> for SettingsError {
    fn from(e: PropertyError) -> Self {
        SettingsError::Property(e)
    }
}

/// Contact information published in capabilities documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactInfo {
    pub person: Option<String>,
    pub organization: Option<String>,
    pub position: Option<String>,
    pub email: Option<String>,
    pub voice: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Coverage reader thread pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoverageAccess {
    pub core_pool_size: u32,
    pub max_pool_size: u32,
    pub keep_alive_time: u64,
    pub queue_type: String,
}

impl Default for CoverageAccess {
    fn default() -> Self {
        Self {
            core_pool_size: 5,
            max_pool_size: 10,
            keep_alive_time: 30_000,
            queue_type: "UNBOUNDED".to_string(),
        }
    }
}

/// Image processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImagingSettings {
    pub memory_capacity: f64,
    pub memory_threshold: f64,
    pub tile_threads: u32,
    pub tile_priority: u32,
    pub recycling: bool,
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            memory_capacity: 0.5,
            memory_threshold: 0.75,
            tile_threads: 7,
            tile_priority: 5,
            recycling: false,
        }
    }
}

/// Server-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalSettings {
    pub id: String,
    pub charset: String,
    pub num_decimals: u32,
    pub online_resource: Option<String>,
    pub proxy_base_url: Option<String>,
    pub verbose: bool,
    pub verbose_exceptions: bool,
    pub update_sequence: u64,
    pub contact: ContactInfo,
    pub coverage_access: CoverageAccess,
    pub imaging: ImagingSettings,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            id: "global".to_string(),
            charset: "UTF-8".to_string(),
            num_decimals: 4,
            online_resource: None,
            proxy_base_url: None,
            verbose: false,
            verbose_exceptions: false,
            update_sequence: 0,
            contact: ContactInfo::default(),
            coverage_access: CoverageAccess::default(),
            imaging: ImagingSettings::default(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub id: String,
    pub level: String,
    pub location: String,
    pub stdout_logging: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            id: "logging".to_string(),
            level: "INFO".to_string(),
            location: "logs/server.log".to_string(),
            stdout_logging: true,
        }
    }
}

/// Configuration of one OGC service (WMS, WFS, WCS...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceSettings {
    pub id: String,
    pub name: String,
    pub workspace: Option<String>,
    pub enabled: bool,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub maintainer: Option<String>,
    pub keywords: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl ServiceSettings {
    /// Create an enabled service with the given id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            ..Default::default()
        }
    }
}

/// Observer of configuration changes
///
/// `handle_*_change` is called with the edit still pending (the wrapper
/// carries the diff); `handle_post_*_change` after it was committed.
#[async_trait]
pub trait ConfigurationListener: Send + Sync {
    async fn handle_global_change(&self, _global: &Tracked<GlobalSettings>) {}

    async fn handle_post_global_change(&self, _global: &GlobalSettings) {}

    async fn handle_logging_change(&self, _logging: &Tracked<LoggingSettings>) {}

    async fn handle_post_logging_change(&self, _logging: &LoggingSettings) {}

    async fn handle_service_change(&self, _service: &Tracked<ServiceSettings>) {}

    async fn handle_post_service_change(&self, _service: &ServiceSettings) {}

    async fn handle_service_added(&self, _service: &ServiceSettings) {}

    async fn handle_service_removed(&self, _service: &ServiceSettings) {}

    /// Called after the whole configuration was reloaded
    async fn reloaded(&self) {}
}

/// In-memory server configuration
pub struct GeoServer {
    data_dir: PathBuf,
    global: RwLock<GlobalSettings>,
    logging: RwLock<LoggingSettings>,
    services: RwLock<BTreeMap<String, ServiceSettings>>,
    listeners: RwLock<Vec<Arc<dyn ConfigurationListener>>>,
}

impl GeoServer {
    /// Create a configuration with default settings rooted at a data dir
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            global: RwLock::new(GlobalSettings::default()),
            logging: RwLock::new(LoggingSettings::default()),
            services: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Data directory root
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Register a configuration listener
    pub fn add_listener(&self, listener: Arc<dyn ConfigurationListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a listener previously added with [`add_listener`](Self::add_listener)
    pub fn remove_listener(&self, listener: &Arc<dyn ConfigurationListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .write()
            .retain(|l| Arc::as_ptr(l) as *const () != target);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn listeners(&self) -> Vec<Arc<dyn ConfigurationListener>> {
        self.listeners.read().clone()
    }

    /// Snapshot of the global settings
    pub fn global(&self) -> GlobalSettings {
        self.global.read().clone()
    }

    /// Start editing the global settings
    pub fn edit_global(&self) -> Tracked<GlobalSettings> {
        Tracked::new(self.global())
    }

    /// Commit an edit of the global settings and notify listeners
    pub async fn save_global(&self, edit: Tracked<GlobalSettings>) {
        for listener in self.listeners() {
            listener.handle_global_change(&edit).await;
        }
        let committed = edit.into_inner();
        *self.global.write() = committed.clone();
        debug!("Global settings saved");
        for listener in self.listeners() {
            listener.handle_post_global_change(&committed).await;
        }
    }

    /// Snapshot of the logging settings
    pub fn logging(&self) -> LoggingSettings {
        self.logging.read().clone()
    }

    /// Start editing the logging settings
    pub fn edit_logging(&self) -> Tracked<LoggingSettings> {
        Tracked::new(self.logging())
    }

    /// Commit an edit of the logging settings and notify listeners
    pub async fn save_logging(&self, edit: Tracked<LoggingSettings>) {
        for listener in self.listeners() {
            listener.handle_logging_change(&edit).await;
        }
        let committed = edit.into_inner();
        *self.logging.write() = committed.clone();
        debug!("Logging settings saved (level={})", committed.level);
        for listener in self.listeners() {
            listener.handle_post_logging_change(&committed).await;
        }
    }

    /// Look up a service by id
    pub fn service(&self, id: &str) -> Option<ServiceSettings> {
        self.services.read().get(id).cloned()
    }

    /// Look up a service by name within a workspace (`None` for global services)
    pub fn service_by_name(&self, name: &str, workspace: Option<&str>) -> Option<ServiceSettings> {
        self.services
            .read()
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name) && s.workspace.as_deref() == workspace)
            .cloned()
    }

    /// All services
    pub fn services(&self) -> Vec<ServiceSettings> {
        self.services.read().values().cloned().collect()
    }

    /// Register a new service configuration and notify listeners
    pub async fn add_service(&self, service: ServiceSettings) -> Result<(), SettingsError> {
        {
            let mut services = self.services.write();
            if services.contains_key(&service.id) {
                return Err(SettingsError::DuplicateService(service.id));
            }
            services.insert(service.id.clone(), service.clone());
        }
        debug!("Service '{}' added", service.name);
        for listener in self.listeners() {
            listener.handle_service_added(&service).await;
        }
        Ok(())
    }

    /// Start editing a service
    pub fn edit_service(&self, id: &str) -> Result<Tracked<ServiceSettings>, SettingsError> {
        self.service(id)
            .map(Tracked::new)
            .ok_or_else(|| SettingsError::ServiceNotFound(id.to_string()))
    }

    /// Commit an edit of a service and notify listeners
    pub async fn save_service(&self, edit: Tracked<ServiceSettings>) -> Result<(), SettingsError> {
        let id = edit.original().id.clone();
        if !self.services.read().contains_key(&id) {
            return Err(SettingsError::ServiceNotFound(id));
        }
        if edit.current().id != id {
            return Err(SettingsError::Stale(id));
        }
        for listener in self.listeners() {
            listener.handle_service_change(&edit).await;
        }
        let committed = edit.into_inner();
        self.services.write().insert(id, committed.clone());
        debug!("Service '{}' saved", committed.name);
        for listener in self.listeners() {
            listener.handle_post_service_change(&committed).await;
        }
        Ok(())
    }

    /// Remove a service configuration
    pub async fn remove_service(&self, id: &str) -> Result<ServiceSettings, SettingsError> {
        let removed = self
            .services
            .write()
            .remove(id)
            .ok_or_else(|| SettingsError::ServiceNotFound(id.to_string()))?;
        for listener in self.listeners() {
            listener.handle_service_removed(&removed).await;
        }
        Ok(removed)
    }

    /// Replace state with previously persisted values without notifying listeners
    pub fn restore(
        &self,
        global: Option<GlobalSettings>,
        logging: Option<LoggingSettings>,
        services: Vec<ServiceSettings>,
    ) {
        if let Some(global) = global {
            *self.global.write() = global;
        }
        if let Some(logging) = logging {
            *self.logging.write() = logging;
        }
        let mut map = self.services.write();
        for service in services {
            map.insert(service.id.clone(), service);
        }
    }

    /// Notify listeners that the configuration was reloaded
    pub async fn fire_reloaded(&self) {
        for listener in self.listeners() {
            listener.reloaded().await;
        }
    }
}
