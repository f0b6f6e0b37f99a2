//! Cluster Configuration Store
//!
//! Process-wide key/value registry for cluster tunables, persisted as a
//! flat `cluster.properties` file in the cluster configuration directory.
//!
//! Values come from four places, in increasing precedence: extension
//! defaults, the stored file, external overrides (environment) and
//! explicit `put` calls at runtime. Nothing reaches disk until
//! [`ClusterConfiguration::store`] is called.
//!
//! Every accessor is individually atomic, but check-then-act sequences
//! such as [`ClusterConfiguration::check_for_override`] are not isolated
//! from a concurrent `put`. Tunables change rarely, so the last write
//! wins.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::model::write_atomic;

pub mod extension;
pub mod properties;


pub use extension::{ConfigurationExtension, DefaultsExtension};

/// Well-known tunable keys and their defaults
pub mod keys {
    pub const INSTANCE_NAME: &str = "instanceName";
    pub const BROKER_URL: &str = "brokerURL";
    pub const TOPIC_NAME: &str = "topicName";
    pub const CONNECTION: &str = "connection";
    pub const CONNECTION_RETRY: &str = "connection.retry";
    pub const CONNECTION_MAXWAIT: &str = "connection.maxwait";
    pub const TOGGLE_MASTER: &str = "toggleMaster";
    pub const TOGGLE_SLAVE: &str = "toggleSlave";
    pub const READ_ONLY: &str = "readOnly";
    pub const CONFIG_DIR: &str = "CLUSTER_CONFIG_DIR";

    pub const ENABLED: &str = "enabled";
    pub const DISABLED: &str = "disabled";

    pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:61616";
    pub const DEFAULT_TOPIC_NAME: &str = "VirtualTopic.geoserver";
    pub const DEFAULT_CONNECTION_RETRY: u32 = 3;
    pub const DEFAULT_CONNECTION_MAXWAIT: u64 = 200;
}

/// Name of the persisted configuration file
pub const CONFIG_FILE_NAME: &str = "cluster.properties";

/// Sub-directory of the data dir used when no override is given
pub const DEFAULT_CONFIG_SUBDIR: &str = "cluster";

/// Configuration store error types
#[derive(Debug)]
pub enum ConfigurationError {
    /// IO error reading or writing the file
    Io(io::Error),
    /// Malformed properties content
    Format { line: usize, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::Io(e) => write!(f, "IO error: {}", e),
            ConfigurationError::Format { line, reason } => {
                write!(f, "Format error at line {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for ConfigurationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigurationError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigurationError {
    fn from(e: io::Error) -> Self {
        ConfigurationError::Io(e)
    }
}

/// Source of externally supplied values that take precedence over defaults
pub trait OverrideSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Overrides read from process environment variables named after the key
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvOverrides;

impl OverrideSource for EnvOverrides {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Overrides from an explicit map
#[derive(Debug, Default)]
pub struct MapOverrides {
    values: RwLock<BTreeMap<String, String>>,
}

impl MapOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn unset(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl OverrideSource for MapOverrides {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Parse an enabled/disabled style flag
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "enabled" | "true" | "yes" | "on" => Some(true),
        "disabled" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Render a flag the way the connection and read-only keys store it
pub fn flag_value(enabled: bool) -> &'static str {
    if enabled {
        keys::ENABLED
    } else {
        keys::DISABLED
    }
}

/// Cluster tunables store
pub struct ClusterConfiguration {
    dir: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    overrides: Arc<dyn OverrideSource>,
    extensions: Vec<Arc<dyn ConfigurationExtension>>,
}

impl ClusterConfiguration {
    /// Create a store for a directory with the standard extensions
    pub fn new(dir: impl Into<PathBuf>, overrides: Arc<dyn OverrideSource>) -> Self {
        let dir = dir.into();
        let extensions = DefaultsExtension::standard(&dir)
            .into_iter()
            .map(|ext| Arc::new(ext) as Arc<dyn ConfigurationExtension>)
            .collect();
        Self::with_extensions(dir, overrides, extensions)
    }

    /// Create a store with an explicit extension list
    pub fn with_extensions(
        dir: impl Into<PathBuf>,
        overrides: Arc<dyn OverrideSource>,
        extensions: Vec<Arc<dyn ConfigurationExtension>>,
    ) -> Self {
        Self {
            dir: dir.into(),
            entries: RwLock::new(BTreeMap::new()),
            overrides,
            extensions,
        }
    }

    /// Resolve the configuration directory for a data dir
    ///
    /// An override of `CLUSTER_CONFIG_DIR` wins over `<data-dir>/cluster`.
    pub fn resolve_dir(data_dir: &Path, overrides: &dyn OverrideSource) -> PathBuf {
        overrides
            .get(keys::CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_CONFIG_SUBDIR))
    }

    /// Configuration directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted file
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    /// Bring the store up
    ///
    /// A missing file is seeded with defaults and written. An existing
    /// file is loaded, overrides are applied, and the file is rewritten
    /// only if an override changed something.
    pub fn init(&self) -> Result<(), ConfigurationError> {
        if self.load()? {
            self.init_defaults();
            if self.check_for_overrides() {
                info!("Cluster configuration overridden, storing");
                self.store()?;
            }
        } else {
            info!(
                "No cluster configuration at {:?}, creating defaults",
                self.file_path()
            );
            self.init_defaults();
            self.check_for_overrides();
            self.store()?;
        }
        Ok(())
    }

    /// Load the file into memory
    ///
    /// Returns false if the file does not exist. Loaded values replace
    /// in-memory ones with the same key. Malformed entries are skipped
    /// with a warning so their keys fall back to defaults.
    pub fn load(&self) -> Result<bool, ConfigurationError> {
        let content = match std::fs::read_to_string(self.file_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let path = self.file_path();
        let loaded = properties::parse_lenient(&content, |e| {
            warn!("Skipping cluster setting in {:?}: {}", path, e);
        });
        debug!(
            "Loaded {} cluster settings from {:?}",
            loaded.len(),
            path
        );
        self.entries.write().extend(loaded);
        Ok(true)
    }

    /// Seed defaults for every key that has no value yet
    ///
    /// Running this on a populated store changes nothing.
    pub fn init_defaults(&self) {
        self.put_default(keys::INSTANCE_NAME, uuid::Uuid::new_v4().to_string());
        for ext in &self.extensions {
            ext.init_defaults(self);
            debug!("Initialized defaults for '{}' extension", ext.name());
        }
    }

    /// Apply overrides for every known key
    ///
    /// Returns true if any override differs from its default.
    pub fn check_for_overrides(&self) -> bool {
        let mut overridden = false;
        if let Some(name) = self.overrides.get(keys::INSTANCE_NAME) {
            overridden |= self.get(keys::INSTANCE_NAME).as_deref() != Some(name.as_str());
            self.put(keys::INSTANCE_NAME, name);
        }
        for ext in &self.extensions {
            overridden |= ext.check_for_overrides(self);
        }
        overridden
    }

    /// Apply the override for one key
    ///
    /// Without an override this does nothing and returns false. With one,
    /// the store takes the override and the result says whether it
    /// differs from `default`. Repeating the call gives the same answer.
    pub fn check_for_override(&self, key: &str, default: &str) -> bool {
        match self.overrides.get(key) {
            Some(value) => {
                let differs = value != default;
                if differs {
                    debug!("Cluster setting '{}' overridden", key);
                }
                self.put(key, value);
                differs
            }
            None => false,
        }
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Set a value in memory, returning the previous one
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.write().insert(key.into(), value.into())
    }

    /// Set a value only if the key is absent; returns true if it was set
    pub fn put_default(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let mut entries = self.entries.write();
        let key = key.into();
        if entries.contains_key(&key) {
            false
        } else {
            entries.insert(key, value.into());
            true
        }
    }

    /// Remove a value from memory
    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }

    /// Copy of every entry
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }

    /// Flush in-memory entries to disk
    ///
    /// The file is replaced atomically; a failed store leaves the previous
    /// file intact.
    pub fn store(&self) -> Result<(), ConfigurationError> {
        let content = properties::write(&self.entries(), Some("cluster configuration"));
        write_atomic(&self.file_path(), content.as_bytes())?;
        debug!("Stored cluster configuration to {:?}", self.file_path());
        Ok(())
    }

    /// Parse a value, falling back to `default` when missing or malformed
    pub fn get_parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + fmt::Display,
    {
        match self.get(key) {
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!(
                        "Malformed value '{}' for cluster setting '{}', using {}",
                        raw, key, default
                    );
                    default
                }
            },
            None => default,
        }
    }

    /// Read an enabled/disabled flag, falling back to `default`
    pub fn get_flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warn!(
                    "Malformed flag '{}' for cluster setting '{}', using {}",
                    raw,
                    key,
                    flag_value(default)
                );
                default
            }),
            None => default,
        }
    }

    /// Identity of this member
    pub fn instance_name(&self) -> String {
        self.get(keys::INSTANCE_NAME).unwrap_or_default()
    }

    pub fn broker_url(&self) -> String {
        self.get(keys::BROKER_URL)
            .unwrap_or_else(|| keys::DEFAULT_BROKER_URL.to_string())
    }

    pub fn topic_name(&self) -> String {
        self.get(keys::TOPIC_NAME)
            .unwrap_or_else(|| keys::DEFAULT_TOPIC_NAME.to_string())
    }

    /// Whether the member should connect at startup
    pub fn connection_enabled(&self) -> bool {
        self.get_flag(keys::CONNECTION, true)
    }

    /// Number of registration/teardown polls
    pub fn connection_retry(&self) -> u32 {
        self.get_parsed(keys::CONNECTION_RETRY, keys::DEFAULT_CONNECTION_RETRY)
    }

    /// Delay between polls
    pub fn connection_max_wait(&self) -> Duration {
        Duration::from_millis(
            self.get_parsed(keys::CONNECTION_MAXWAIT, keys::DEFAULT_CONNECTION_MAXWAIT),
        )
    }

    pub fn read_only(&self) -> bool {
        self.get_flag(keys::READ_ONLY, false)
    }

    /// Persisted producer toggle
    pub fn toggle_master(&self) -> bool {
        self.get_flag(keys::TOGGLE_MASTER, true)
    }

    /// Persisted consumer toggle
    pub fn toggle_slave(&self) -> bool {
        self.get_flag(keys::TOGGLE_SLAVE, true)
    }
}
