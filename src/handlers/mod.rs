//! Event Handler Registry
//!
//! Handlers turn events into transport payloads and apply received
//! payloads to the local model. The registry is filled once at startup,
//! kept sorted by priority (lower first, ties in registration order) and
//! resolves an event to the first handler that claims it.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::events::{ClusterEvent, EventError};
use crate::model::{Catalog, CatalogError, GeoServer, PropertyError, SettingsError};
use crate::toggle::ToggleSwitch;
use crate::transport::{ClusterMessage, EVENT_KIND_PROPERTY};

pub mod catalog;
pub mod configuration;
pub mod document;


pub use catalog::CatalogEventHandler;
pub use configuration::GeoServerHandler;
pub use document::DocumentHandler;

/// Message property asking the receiver to also delete style documents
pub const PURGE_PROPERTY: &str = "purge";

/// Handler error types
#[derive(Debug)]
pub enum HandlerError {
    /// No registered handler accepts the event
    NoHandlerFound(String),
    /// The event could not be encoded
    Serialize(String),
    /// The payload could not be decoded
    Deserialize(String),
    /// The handler was given an event it does not handle
    Unsupported(String),
    /// Applying to the catalog failed
    Catalog(CatalogError),
    /// Applying to the settings failed
    Settings(SettingsError),
    /// Property replay failed
    Property(PropertyError),
    /// Event invariant violated
    Event(EventError),
    /// IO error writing data directory files
    Io(io::Error),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::NoHandlerFound(what) => write!(f, "No handler found for {}", what),
            HandlerError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            HandlerError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
            HandlerError::Unsupported(msg) => write!(f, "Unsupported event: {}", msg),
            HandlerError::Catalog(e) => write!(f, "Catalog error: {}", e),
            HandlerError::Settings(e) => write!(f, "Settings error: {}", e),
            HandlerError::Property(e) => write!(f, "Property error: {}", e),
            HandlerError::Event(e) => write!(f, "Event error: {}", e),
            HandlerError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Catalog(e) => Some(e),
            HandlerError::Settings(e) => Some(e),
            HandlerError::Property(e) => Some(e),
            HandlerError::Event(e) => Some(e),
            HandlerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CatalogError> for HandlerError {
    fn from(e: CatalogError) -> Self {
        HandlerError::Catalog(e)
    }
}

impl From<SettingsError> for HandlerError {
    fn from(e: SettingsError) -> Self {
        HandlerError::Settings(e)
    }
}

impl From<PropertyError> for HandlerError {
    fn from(e: PropertyError) -> Self {
        HandlerError::Property(e)
    }
}

impl From<EventError> for HandlerError {
    fn from(e: EventError) -> Self {
        HandlerError::Event(e)
    }
}

impl From<io::Error> for HandlerError {
    fn from(e: io::Error) -> Self {
        HandlerError::Io(e)
    }
}

/// Serializer and applier for one family of events
///
/// Payloads default to the JSON form of [`ClusterEvent`]; handlers may
/// override both directions with their own format. `synchronize` should
/// be idempotent: the transport may deliver a message more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique name carried in outbound messages
    fn name(&self) -> &str;

    /// Lower values are consulted first
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this handler is responsible for the event
    fn can_handle(&self, event: &ClusterEvent) -> bool;

    /// Producer suspended while this handler applies an event
    fn producer(&self) -> &ToggleSwitch;

    /// Encode an event into a transport payload
    fn serialize(&self, event: &ClusterEvent) -> Result<Vec<u8>, HandlerError> {
        event
            .to_json()
            .map_err(|e| HandlerError::Serialize(e.to_string()))
    }

    /// Decode a transport payload
    fn deserialize(&self, payload: &[u8]) -> Result<ClusterEvent, HandlerError> {
        ClusterEvent::from_json(payload).map_err(|e| HandlerError::Deserialize(e.to_string()))
    }

    /// Apply a received event to the local model
    ///
    /// Returns whether anything was applied. Called with the producer
    /// already suspended.
    async fn synchronize(
        &self,
        event: ClusterEvent,
        properties: &BTreeMap<String, String>,
    ) -> Result<bool, HandlerError>;
}

/// Priority-ordered handler set
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the catalog, settings and document handlers
    pub fn with_defaults(
        geoserver: Arc<GeoServer>,
        catalog: Arc<Catalog>,
        producer: Arc<ToggleSwitch>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DocumentHandler::new(
            catalog.data_dir().to_path_buf(),
            producer.clone(),
        )));
        registry.register(Arc::new(GeoServerHandler::new(geoserver, producer.clone())));
        registry.register(Arc::new(CatalogEventHandler::add(
            catalog.clone(),
            producer.clone(),
        )));
        registry.register(Arc::new(CatalogEventHandler::remove(
            catalog.clone(),
            producer.clone(),
        )));
        registry.register(Arc::new(CatalogEventHandler::modify(
            catalog.clone(),
            producer.clone(),
        )));
        registry.register(Arc::new(CatalogEventHandler::post_modify(catalog, producer)));
        registry
    }

    /// Add a handler after every handler with a lower or equal priority
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let priority = handler.priority();
        let idx = self
            .handlers
            .iter()
            .position(|h| h.priority() > priority)
            .unwrap_or(self.handlers.len());
        debug!(
            "Registered handler '{}' (priority {})",
            handler.name(),
            priority
        );
        self.handlers.insert(idx, handler);
    }

    /// Handlers in lookup order
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn EventHandler>> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// First handler that accepts the event
    pub fn find(&self, event: &ClusterEvent) -> Result<Arc<dyn EventHandler>, HandlerError> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(event))
            .cloned()
            .ok_or_else(|| HandlerError::NoHandlerFound(event.kind().to_string()))
    }

    /// Handler registered under a name
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    /// Encode an event into a transport message
    pub fn serialize(&self, event: &ClusterEvent) -> Result<ClusterMessage, HandlerError> {
        let handler = self.find(event)?;
        let payload = handler.serialize(event)?;
        Ok(ClusterMessage::new(handler.name(), payload)
            .with_property(EVENT_KIND_PROPERTY, event.kind().as_str()))
    }

    /// Decode a transport message and resolve its handler
    ///
    /// The handler named in the message is tried first; otherwise the
    /// payload is decoded as a generic event and matched by `can_handle`.
    pub fn deserialize(
        &self,
        message: &ClusterMessage,
    ) -> Result<(Arc<dyn EventHandler>, ClusterEvent), HandlerError> {
        if let Some(handler) = self.find_by_name(&message.handler) {
            let event = handler.deserialize(&message.payload)?;
            if handler.can_handle(&event) {
                return Ok((handler, event));
            }
            warn!(
                "Handler '{}' cannot handle {}, searching registry",
                message.handler,
                event.kind()
            );
            let handler = self.find(&event)?;
            return Ok((handler, event));
        }

        let event = ClusterEvent::from_json(&message.payload).map_err(|_| {
            HandlerError::NoHandlerFound(format!("handler '{}'", message.handler))
        })?;
        let handler = self.find(&event)?;
        Ok((handler, event))
    }

    /// Apply a received message
    ///
    /// The handler's producer is suspended for the duration of the apply
    /// and released on every exit path. A toggle command issued during the
    /// apply is what the producer shows afterwards.
    pub async fn synchronize(&self, message: &ClusterMessage) -> Result<bool, HandlerError> {
        let (handler, event) = self.deserialize(message)?;
        debug!(
            "Synchronizing {} via '{}'",
            event.subject(),
            handler.name()
        );
        let _guard = handler.producer().suspend();
        handler.synchronize(event, &message.properties).await
    }
}
