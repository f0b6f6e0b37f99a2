//! Data directory persistence
//!
//! Mirrors committed model changes to JSON files under the data
//! directory and reads them back on startup. Members running in
//! read-only mode simply never attach the persister.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::catalog::{Catalog, CatalogError, CatalogInfo, CatalogListener};
use super::property::Tracked;
use super::settings::{
    ConfigurationListener, GeoServer, GlobalSettings, LoggingSettings, ServiceSettings,
};

const CATALOG_DIR: &str = "catalog";
const SERVICES_DIR: &str = "services";
const GLOBAL_FILE: &str = "global.json";
const LOGGING_FILE: &str = "logging.json";

/// Replace a file with new content without exposing partial writes
///
/// The content goes to a sibling temp file which is synced and then
/// renamed over the target, so readers see either the old or the new
/// file, never a truncated one.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = parent.join(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Model state read back from a data directory
#[derive(Debug, Default)]
pub struct Snapshot {
    pub global: Option<GlobalSettings>,
    pub logging: Option<LoggingSettings>,
    pub services: Vec<ServiceSettings>,
    pub catalog: Vec<CatalogInfo>,
}

/// Writes committed changes to the data directory
pub struct DataDirPersister {
    root: PathBuf,
}

impl DataDirPersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Data directory root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn catalog_path(&self, info: &CatalogInfo) -> PathBuf {
        self.root
            .join(CATALOG_DIR)
            .join(info.kind.as_str())
            .join(format!("{}.json", info.id))
    }

    fn service_path(&self, service: &ServiceSettings) -> PathBuf {
        self.root
            .join(SERVICES_DIR)
            .join(format!("{}.json", service.id))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &data)?;
        debug!("Persisted {:?}", path);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Read whatever state the data directory holds
    ///
    /// Unreadable files are skipped with a warning.
    pub fn load(&self) -> io::Result<Snapshot> {
        let mut snapshot = Snapshot {
            global: read_json(&self.root.join(GLOBAL_FILE)),
            logging: read_json(&self.root.join(LOGGING_FILE)),
            ..Default::default()
        };

        for path in json_files(&self.root.join(SERVICES_DIR))? {
            if let Some(service) = read_json(&path) {
                snapshot.services.push(service);
            }
        }

        let catalog_root = self.root.join(CATALOG_DIR);
        if catalog_root.is_dir() {
            for entry in fs::read_dir(&catalog_root)? {
                let dir = entry?.path();
                if !dir.is_dir() {
                    continue;
                }
                for path in json_files(&dir)? {
                    if let Some(info) = read_json(&path) {
                        snapshot.catalog.push(info);
                    }
                }
            }
        }

        Ok(snapshot)
    }
}

fn json_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping malformed {:?}: {}", path, e);
            None
        }
    }
}

#[async_trait]
impl CatalogListener for DataDirPersister {
    async fn handle_add(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        let info = info.current();
        self.write_json(&self.catalog_path(info), info)?;
        Ok(())
    }

    async fn handle_remove(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        self.remove(&self.catalog_path(info.current()))?;
        Ok(())
    }

    async fn handle_post_modify(&self, info: &CatalogInfo) -> Result<(), CatalogError> {
        self.write_json(&self.catalog_path(info), info)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigurationListener for DataDirPersister {
    async fn handle_post_global_change(&self, global: &GlobalSettings) {
        if let Err(e) = self.write_json(&self.root.join(GLOBAL_FILE), global) {
            warn!("Failed to persist global settings: {}", e);
        }
    }

    async fn handle_post_logging_change(&self, logging: &LoggingSettings) {
        if let Err(e) = self.write_json(&self.root.join(LOGGING_FILE), logging) {
            warn!("Failed to persist logging settings: {}", e);
        }
    }

    async fn handle_post_service_change(&self, service: &ServiceSettings) {
        if let Err(e) = self.write_json(&self.service_path(service), service) {
            warn!("Failed to persist service '{}': {}", service.name, e);
        }
    }

    async fn handle_service_added(&self, service: &ServiceSettings) {
        if let Err(e) = self.write_json(&self.service_path(service), service) {
            warn!("Failed to persist service '{}': {}", service.name, e);
        }
    }

    async fn handle_service_removed(&self, service: &ServiceSettings) {
        if let Err(e) = self.remove(&self.service_path(service)) {
            warn!("Failed to remove service '{}': {}", service.name, e);
        }
    }
}

/// Attaches or detaches a persister from the model
///
/// Detached means read-only: replicated changes stay in memory.
pub struct PersistenceSwitch {
    persister: Arc<DataDirPersister>,
    catalog: Arc<Catalog>,
    geoserver: Arc<GeoServer>,
    attached: Mutex<bool>,
}

impl PersistenceSwitch {
    /// Create a switch with the persister detached
    pub fn new(
        persister: Arc<DataDirPersister>,
        catalog: Arc<Catalog>,
        geoserver: Arc<GeoServer>,
    ) -> Self {
        Self {
            persister,
            catalog,
            geoserver,
            attached: Mutex::new(false),
        }
    }

    pub fn persister(&self) -> &Arc<DataDirPersister> {
        &self.persister
    }

    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }

    /// Start writing committed changes to the data directory
    pub fn attach(&self) {
        let mut attached = self.attached.lock();
        if *attached {
            return;
        }
        self.catalog.add_listener(self.persister.clone());
        self.geoserver.add_listener(self.persister.clone());
        *attached = true;
        info!("Data directory persistence enabled");
    }

    /// Stop writing to the data directory
    pub fn detach(&self) {
        let mut attached = self.attached.lock();
        if !*attached {
            return;
        }
        let catalog_listener: Arc<dyn CatalogListener> = self.persister.clone();
        self.catalog.remove_listener(&catalog_listener);
        let config_listener: Arc<dyn ConfigurationListener> = self.persister.clone();
        self.geoserver.remove_listener(&config_listener);
        *attached = false;
        info!("Data directory persistence disabled (read-only)");
    }

    /// Detach when `read_only`, attach otherwise
    pub fn set_read_only(&self, read_only: bool) {
        if read_only {
            self.detach();
        } else {
            self.attach();
        }
    }
}
