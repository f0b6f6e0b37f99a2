//! Configuration extensions
//!
//! Each extension owns a group of tunables: it seeds their defaults on
//! first bring-up and checks them against the override source on every
//! start.

use std::path::Path;

use super::{keys, ClusterConfiguration};

/// Contributor of default tunables
pub trait ConfigurationExtension: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Keys owned by this extension with their default values
    fn defaults(&self) -> Vec<(&'static str, String)>;

    /// Seed defaults for keys that have no value yet
    fn init_defaults(&self, config: &ClusterConfiguration) {
        for (key, value) in self.defaults() {
            config.put_default(key, value);
        }
    }

    /// Apply overrides for every owned key
    ///
    /// Returns true if any override differs from its default.
    fn check_for_overrides(&self, config: &ClusterConfiguration) -> bool {
        let mut overridden = false;
        for (key, value) in self.defaults() {
            overridden |= config.check_for_override(key, &value);
        }
        overridden
    }
}

/// Extension backed by a fixed table of defaults
#[derive(Debug, Clone)]
pub struct DefaultsExtension {
    name: &'static str,
    defaults: Vec<(&'static str, String)>,
}

impl DefaultsExtension {
    pub fn new(name: &'static str, defaults: Vec<(&'static str, String)>) -> Self {
        Self { name, defaults }
    }

    /// Broker location
    pub fn broker() -> Self {
        Self::new(
            "broker",
            vec![(keys::BROKER_URL, keys::DEFAULT_BROKER_URL.to_string())],
        )
    }

    /// Destination topic
    pub fn topic() -> Self {
        Self::new(
            "topic",
            vec![(keys::TOPIC_NAME, keys::DEFAULT_TOPIC_NAME.to_string())],
        )
    }

    /// Connection flag and retry budget
    pub fn connection() -> Self {
        Self::new(
            "connection",
            vec![
                (keys::CONNECTION, keys::ENABLED.to_string()),
                (
                    keys::CONNECTION_RETRY,
                    keys::DEFAULT_CONNECTION_RETRY.to_string(),
                ),
                (
                    keys::CONNECTION_MAXWAIT,
                    keys::DEFAULT_CONNECTION_MAXWAIT.to_string(),
                ),
            ],
        )
    }

    /// Persisted producer/consumer toggles
    pub fn toggle() -> Self {
        Self::new(
            "toggle",
            vec![
                (keys::TOGGLE_MASTER, "true".to_string()),
                (keys::TOGGLE_SLAVE, "true".to_string()),
            ],
        )
    }

    /// Read-only data directory mode
    pub fn read_only() -> Self {
        Self::new(
            "read-only",
            vec![(keys::READ_ONLY, keys::DISABLED.to_string())],
        )
    }

    /// Location of the cluster configuration itself
    pub fn config_dir(dir: &Path) -> Self {
        Self::new(
            "config-dir",
            vec![(keys::CONFIG_DIR, dir.display().to_string())],
        )
    }

    /// The standard set of extensions for a configuration directory
    pub fn standard(dir: &Path) -> Vec<Self> {
        vec![
            Self::broker(),
            Self::topic(),
            Self::connection(),
            Self::toggle(),
            Self::read_only(),
            Self::config_dir(dir),
        ]
    }
}

impl ConfigurationExtension for DefaultsExtension {
    fn name(&self) -> &str {
        self.name
    }

    fn defaults(&self) -> Vec<(&'static str, String)> {
        self.defaults.clone()
    }
}
