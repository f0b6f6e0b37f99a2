//! Change Dispatch
//!
//! Observes local catalog and settings mutations and publishes them as
//! cluster events. Every publish goes through [`Publisher`], which drops
//! events while the producer is disabled and tags outbound messages with
//! the local instance name and any request-scoped properties.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::configuration::ClusterConfiguration;
use crate::events::ClusterEvent;
use crate::handlers::{HandlerError, HandlerRegistry};
use crate::model::CatalogError;
use crate::toggle::ToggleSwitch;
use crate::transport::{Transport, TransportError, ORIGIN_PROPERTY};

pub mod catalog;
pub mod configuration;


pub use catalog::CatalogSyncListener;
pub use configuration::ConfigurationSyncListener;

tokio::task_local! {
    static REQUEST_PROPERTIES: BTreeMap<String, String>;
}

/// Run `fut` with properties attached to every event it publishes
///
/// Used by request entry points (REST calls, the controller) to pass
/// parameters such as `purge` along with the resulting events.
pub async fn with_request_properties<F>(properties: BTreeMap<String, String>, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_PROPERTIES.scope(properties, fut).await
}

/// Properties of the request the current task is serving
pub fn request_properties() -> BTreeMap<String, String> {
    REQUEST_PROPERTIES
        .try_with(|p| p.clone())
        .unwrap_or_default()
}

/// Publish error types
#[derive(Debug)]
pub enum PublishError {
    /// The event could not be serialized
    Handler(HandlerError),
    /// The transport refused the message
    Transport(TransportError),
    /// A companion document could not be read
    Io(std::io::Error),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Handler(e) => write!(f, "Publish failed: {}", e),
            PublishError::Transport(e) => write!(f, "Publish failed: {}", e),
            PublishError::Io(e) => write!(f, "Publish failed: {}", e),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::Handler(e) => Some(e),
            PublishError::Transport(e) => Some(e),
            PublishError::Io(e) => Some(e),
        }
    }
}

impl From<HandlerError> for PublishError {
    fn from(e: HandlerError) -> Self {
        PublishError::Handler(e)
    }
}

impl From<TransportError> for PublishError {
    fn from(e: TransportError) -> Self {
        PublishError::Transport(e)
    }
}

impl From<std::io::Error> for PublishError {
    fn from(e: std::io::Error) -> Self {
        PublishError::Io(e)
    }
}

impl From<PublishError> for CatalogError {
    fn from(e: PublishError) -> Self {
        CatalogError::Listener(e.to_string())
    }
}

/// Producer-gated event publisher
pub struct Publisher {
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn Transport>,
    configuration: Arc<ClusterConfiguration>,
    producer: Arc<ToggleSwitch>,
}

impl Publisher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        transport: Arc<dyn Transport>,
        configuration: Arc<ClusterConfiguration>,
        producer: Arc<ToggleSwitch>,
    ) -> Self {
        Self {
            registry,
            transport,
            configuration,
            producer,
        }
    }

    pub fn producer(&self) -> &Arc<ToggleSwitch> {
        &self.producer
    }

    /// Whether events would currently be published
    pub fn is_enabled(&self) -> bool {
        self.producer.is_enabled()
    }

    /// Publish an event
    ///
    /// Returns whether a message was sent. Disabled producers drop events
    /// silently; a stopped transport drops them with a warning.
    pub async fn publish(&self, event: ClusterEvent) -> Result<bool, PublishError> {
        if !self.producer.is_enabled() {
            debug!("Producer disabled, skipping {}", event.subject());
            return Ok(false);
        }

        let mut message = self.registry.serialize(&event)?;
        for (key, value) in request_properties() {
            message.properties.entry(key).or_insert(value);
        }
        message
            .properties
            .insert(ORIGIN_PROPERTY.to_string(), self.configuration.instance_name());

        if !self.transport.is_running() {
            warn!(
                "Transport '{}' not running, dropping {}",
                self.transport.name(),
                event.subject()
            );
            return Ok(false);
        }

        let destination = self.configuration.topic_name();
        self.transport.send(&destination, message).await?;
        debug!("Published {} to '{}'", event.subject(), destination);
        Ok(true)
    }
}
