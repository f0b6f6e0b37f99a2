//! Message Transport
//!
//! Topic-based publish/subscribe channel between cluster members. The
//! synchronization layer treats it as an opaque, in-order-per-sender,
//! at-least-once channel.
//!
//! Two implementations are provided:
//! - [`MemoryTransport`] over a shared in-process [`MemoryHub`]
//! - [`TcpTransport`] talking to the embedded relay broker

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use tokio::sync::mpsc;

pub mod memory;
pub mod protocol;
pub mod tcp;


pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::TcpTransport;

/// Message property carrying the identity of the producing member
pub const ORIGIN_PROPERTY: &str = "instanceName";

/// Message property carrying the event kind, for logs and filtering
pub const EVENT_KIND_PROPERTY: &str = "eventKind";

/// Transport error types
#[derive(Debug)]
pub enum TransportError {
    /// The transport has not been started
    NotRunning,
    /// The transport is started but not attached to the broker
    NotConnected,
    /// Could not reach the broker
    Connect(String),
    /// The connection dropped
    ConnectionLost(String),
    /// The broker refused the client
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Broker URL could not be understood
    InvalidUrl(String),
    /// Frame encoding failed
    Encode(String),
    /// Frame decoding failed
    Decode(String),
    /// IO error
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotRunning => write!(f, "Transport is not running"),
            TransportError::NotConnected => write!(f, "Transport is not connected"),
            TransportError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            TransportError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            TransportError::Rejected(msg) => write!(f, "Rejected by broker: {}", msg),
            TransportError::Timeout => write!(f, "Operation timed out"),
            TransportError::InvalidUrl(url) => write!(f, "Invalid broker URL: {}", url),
            TransportError::Encode(msg) => write!(f, "Encode error: {}", msg),
            TransportError::Decode(msg) => write!(f, "Decode error: {}", msg),
            TransportError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<bincode::error::EncodeError> for TransportError {
    fn from(e: bincode::error::EncodeError) -> Self {
        TransportError::Encode(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for TransportError {
    fn from(e: bincode::error::DecodeError) -> Self {
        TransportError::Decode(e.to_string())
    }
}

/// Transport envelope of one serialized event
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ClusterMessage {
    /// Name of the handler that produced the payload
    pub handler: String,
    /// Handler-specific payload
    pub payload: Vec<u8>,
    /// Contextual string properties (origin, request parameters...)
    pub properties: BTreeMap<String, String>,
}

impl ClusterMessage {
    pub fn new(handler: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            handler: handler.into(),
            payload,
            properties: BTreeMap::new(),
        }
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Identity of the producing member, if attached
    pub fn origin(&self) -> Option<&str> {
        self.property(ORIGIN_PROPERTY)
    }
}

/// Something the transport delivers to the consumer side
#[derive(Debug)]
pub enum InboundEvent {
    /// A message published by another member
    Message(ClusterMessage),
    /// The listener side of the transport failed
    ///
    /// `recovered` tells whether the transport already re-established
    /// itself. A single underlying failure may be reported more than once.
    ListenerFailure { error: String, recovered: bool },
}

/// Topic-based publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Start listening on a destination, delivering inbound traffic to `sink`
    async fn start(
        &self,
        destination: &str,
        sink: mpsc::Sender<InboundEvent>,
    ) -> Result<(), TransportError>;

    /// Stop listening and release the connection
    async fn stop(&self) -> Result<(), TransportError>;

    /// Whether the transport was started and not stopped since
    fn is_running(&self) -> bool;

    /// Whether the broker acknowledged the subscription
    fn is_registered(&self) -> bool;

    /// Publish a message, returning once the transport accepted it
    async fn send(&self, destination: &str, message: ClusterMessage)
        -> Result<(), TransportError>;
}
