//! Operator Controller
//!
//! The operations an administrator performs on a running member: naming
//! it, pointing it at a broker, switching read-only mode, toggling the
//! producer or consumer, connecting or disconnecting the client and
//! saving the cluster configuration. Changes are kept in memory until
//! [`Controller::save`] is called.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::configuration::{flag_value, keys, ClusterConfiguration, ConfigurationError};
use crate::connection::ConnectionManager;
use crate::model::PersistenceSwitch;
use crate::toggle::{ApplicationEvent, Lifecycle, ToggleType};
use crate::transport::protocol::parse_broker_url;

#[cfg(test)]
mod tests;

/// Controller error types
#[derive(Debug)]
pub enum ControllerError {
    /// An argument was empty or malformed
    Invalid(String),
    /// Connecting or disconnecting the client failed
    Connection(String),
    /// Storing the configuration failed
    Configuration(ConfigurationError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Invalid(msg) => write!(f, "Invalid argument: {}", msg),
            ControllerError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ControllerError::Configuration(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for ControllerError {
    fn from(e: ConfigurationError) -> Self {
        ControllerError::Configuration(e)
    }
}

fn require(value: &str, what: &str) -> Result<(), ControllerError> {
    if value.trim().is_empty() {
        return Err(ControllerError::Invalid(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Operator entry point for one member
pub struct Controller {
    configuration: Arc<ClusterConfiguration>,
    lifecycle: Arc<Lifecycle>,
    connection: Arc<ConnectionManager>,
    persistence: Arc<PersistenceSwitch>,
}

impl Controller {
    pub fn new(
        configuration: Arc<ClusterConfiguration>,
        lifecycle: Arc<Lifecycle>,
        connection: Arc<ConnectionManager>,
        persistence: Arc<PersistenceSwitch>,
    ) -> Self {
        Self {
            configuration,
            lifecycle,
            connection,
            persistence,
        }
    }

    pub fn set_instance_name(&self, name: &str) -> Result<(), ControllerError> {
        require(name, "instance name")?;
        self.configuration.put(keys::INSTANCE_NAME, name);
        Ok(())
    }

    /// Takes effect on the next connect of a TCP transport built from it
    pub fn set_broker_url(&self, url: &str) -> Result<(), ControllerError> {
        parse_broker_url(url).map_err(|e| ControllerError::Invalid(e.to_string()))?;
        self.configuration.put(keys::BROKER_URL, url);
        Ok(())
    }

    /// Detach (or re-attach) the data directory persister
    pub fn set_read_only(&self, read_only: bool) {
        self.persistence.set_read_only(read_only);
        self.configuration.put(keys::READ_ONLY, flag_value(read_only));
    }

    pub fn set_config_dir(&self, path: &str) -> Result<(), ControllerError> {
        require(path, "configuration directory")?;
        self.configuration.put(keys::CONFIG_DIR, path);
        Ok(())
    }

    /// Enable or disable every switch of a kind and remember the choice
    pub fn toggle(&self, enable: bool, kind: ToggleType) {
        self.lifecycle
            .publish(ApplicationEvent::Toggle { enable, kind });
        let key = match kind {
            ToggleType::Producer => keys::TOGGLE_MASTER,
            ToggleType::Consumer => keys::TOGGLE_SLAVE,
        };
        self.configuration.put(key, enable.to_string());
        if enable {
            info!("The {} toggle is now enabled", kind);
        } else {
            warn!(
                "The {} toggle is now disabled, events will not be {}",
                kind,
                match kind {
                    ToggleType::Producer => "published",
                    ToggleType::Consumer => "applied",
                }
            );
        }
    }

    /// Connect or disconnect the cluster client
    ///
    /// The `connection` key follows the outcome. A no-op when the client
    /// is already in the requested state.
    pub async fn connect_client(&self, connect: bool) -> Result<(), ControllerError> {
        if connect {
            if self.connection.is_running() {
                return Ok(());
            }
            if self.connection.connect().await {
                self.configuration.put(keys::CONNECTION, keys::ENABLED);
                Ok(())
            } else {
                self.configuration.put(keys::CONNECTION, keys::DISABLED);
                Err(ControllerError::Connection(
                    "registration aborted due to a connection problem".to_string(),
                ))
            }
        } else {
            if !self.connection.is_running() {
                return Ok(());
            }
            if self.connection.disconnect().await {
                self.configuration.put(keys::CONNECTION, keys::DISABLED);
                Ok(())
            } else {
                self.configuration.put(keys::CONNECTION, keys::ENABLED);
                Err(ControllerError::Connection("disconnection failed".to_string()))
            }
        }
    }

    /// Persist the cluster configuration
    pub fn save(&self) -> Result<(), ControllerError> {
        self.configuration.store()?;
        Ok(())
    }
}
