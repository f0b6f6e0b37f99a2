//! Node Configuration
//!
//! TOML configuration for a cluster member process:
//! - Logging level
//! - Data directory and instance name
//! - Embedded relay broker (bind addresses, role, timeouts)
//! - Environment variable overrides (CLUSTERSYNC__* prefix)
//!
//! Cluster tunables shared between members (broker URL, retry counts,
//! toggles) live in the properties file handled by
//! [`configuration`](crate::configuration), not here.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::broker::{BrokerConfig, BrokerRole};

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Member configuration
    pub node: NodeConfig,
    /// Embedded broker configuration
    pub broker: EmbeddedBrokerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Member configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Data directory holding the catalog, settings and `cluster/`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Overrides `instanceName` in the cluster properties
    pub instance_name: Option<String>,
    /// Capacity of the inbound message queue
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_inbound_capacity() -> usize {
    1024
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            instance_name: None,
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

/// Embedded relay broker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddedBrokerConfig {
    /// Run a relay broker inside this process
    pub enabled: bool,
    /// Client listener address
    #[serde(default = "default_broker_bind")]
    pub bind: SocketAddr,
    /// Management socket address (optional)
    pub management_bind: Option<SocketAddr>,
    /// `master` or `slave`
    #[serde(default = "default_role")]
    pub role: String,
    /// Connect timeout for TCP transports and the management client
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_broker_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 61616))
}

fn default_role() -> String {
    BrokerRole::Master.as_str().to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for EmbeddedBrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_broker_bind(),
            management_bind: None,
            role: default_role(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl EmbeddedBrokerConfig {
    /// Parsed broker role
    pub fn role(&self) -> Result<BrokerRole, ConfigError> {
        self.role
            .parse()
            .map_err(|e: crate::broker::BrokerError| ConfigError::Validation(e.to_string()))
    }

    /// Relay broker settings for a member
    pub fn broker_config(&self, broker_id: &str) -> Result<BrokerConfig, ConfigError> {
        Ok(BrokerConfig {
            broker_id: broker_id.to_string(),
            bind: self.bind,
            role: self.role()?,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `CLUSTERSYNC__` prefix with double underscores for nesting:
    ///    - `CLUSTERSYNC__BROKER__BIND=0.0.0.0:61617` overrides `broker.bind`
    ///    - `CLUSTERSYNC__NODE__DATA_DIR=/var/lib/geoserver` overrides `node.data_dir`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("node.data_dir", "data")?
            .set_default("node.inbound_capacity", 1024)?
            .set_default("broker.enabled", false)?
            .set_default("broker.bind", "0.0.0.0:61616")?
            .set_default("broker.role", "master")?
            .set_default("broker.connect_timeout", "5s")?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("CLUSTERSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "node.data_dir must not be empty".to_string(),
            ));
        }
        if let Some(name) = &self.node.instance_name {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "node.instance_name must not be empty".to_string(),
                ));
            }
        }
        if self.node.inbound_capacity == 0 {
            return Err(ConfigError::Validation(
                "node.inbound_capacity must be at least 1".to_string(),
            ));
        }

        self.broker.role()?;
        if self.broker.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "broker.connect_timeout must be positive".to_string(),
            ));
        }
        if self.broker.management_bind == Some(self.broker.bind) {
            return Err(ConfigError::Validation(
                "broker.management_bind must differ from broker.bind".to_string(),
            ));
        }

        Ok(())
    }
}
