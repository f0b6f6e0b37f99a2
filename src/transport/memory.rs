//! In-process transport
//!
//! A [`MemoryHub`] plays the broker for any number of
//! [`MemoryTransport`]s in the same process. Publishing never echoes to
//! the sender. The hub can be made unavailable or stop acknowledging
//! subscriptions to exercise the connection retry paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ClusterMessage, InboundEvent, Transport, TransportError};

struct Subscriber {
    id: u64,
    sink: mpsc::Sender<InboundEvent>,
}

/// Shared in-process broker
pub struct MemoryHub {
    topics: DashMap<String, Vec<Subscriber>>,
    available: AtomicBool,
    accepting: AtomicBool,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            topics: DashMap::new(),
            available: AtomicBool::new(true),
            accepting: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport attached to this hub
    pub fn transport(self: &Arc<Self>, name: impl Into<String>) -> MemoryTransport {
        MemoryTransport::new(self.clone(), name)
    }

    /// Make the hub refuse (or accept again) new connections
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Make the hub withhold (or grant) subscription acknowledgments
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Total number of messages accepted for publishing
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of subscribers on a destination
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.topics.get(destination).map(|s| s.len()).unwrap_or(0)
    }

    fn subscribe(&self, destination: &str, sink: mpsc::Sender<InboundEvent>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.topics
            .entry(destination.to_string())
            .or_default()
            .push(Subscriber { id, sink });
        id
    }

    fn unsubscribe(&self, destination: &str, id: u64) {
        if let Some(mut subs) = self.topics.get_mut(destination) {
            subs.retain(|s| s.id != id);
        }
    }

    fn is_subscribed(&self, destination: &str, id: u64) -> bool {
        self.topics
            .get(destination)
            .map(|subs| subs.iter().any(|s| s.id == id))
            .unwrap_or(false)
    }

    async fn publish(&self, destination: &str, sender: u64, message: ClusterMessage) {
        self.published.fetch_add(1, Ordering::SeqCst);
        // Clone sinks out so no map guard is held across an await
        let sinks: Vec<_> = self
            .topics
            .get(destination)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.id != sender)
                    .map(|s| s.sink.clone())
                    .collect()
            })
            .unwrap_or_default();

        for sink in sinks {
            if sink.send(InboundEvent::Message(message.clone())).await.is_err() {
                debug!("MemoryHub: dropping message for closed subscriber");
            }
        }
    }

    /// Report a listener failure to every subscriber of a destination
    pub async fn fail_listeners(&self, destination: &str, error: &str, recovered: bool) {
        let sinks: Vec<_> = self
            .topics
            .get(destination)
            .map(|subs| subs.iter().map(|s| s.sink.clone()).collect())
            .unwrap_or_default();
        for sink in sinks {
            let _ = sink
                .send(InboundEvent::ListenerFailure {
                    error: error.to_string(),
                    recovered,
                })
                .await;
        }
    }
}

struct Attachment {
    destination: String,
    id: u64,
}

/// Transport attached to a [`MemoryHub`]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    name: String,
    attachment: Mutex<Option<Attachment>>,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>, name: impl Into<String>) -> Self {
        Self {
            hub,
            name: name.into(),
            attachment: Mutex::new(None),
        }
    }

    fn sender_id(&self) -> Option<u64> {
        self.attachment.lock().as_ref().map(|a| a.id)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &self,
        destination: &str,
        sink: mpsc::Sender<InboundEvent>,
    ) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        if !self.hub.is_available() {
            warn!("MemoryTransport '{}': hub unavailable", self.name);
            return Err(TransportError::Connect("hub unavailable".to_string()));
        }
        let id = self.hub.subscribe(destination, sink);
        *self.attachment.lock() = Some(Attachment {
            destination: destination.to_string(),
            id,
        });
        debug!("MemoryTransport '{}': started on '{}'", self.name, destination);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(attachment) = self.attachment.lock().take() {
            self.hub.unsubscribe(&attachment.destination, attachment.id);
            debug!("MemoryTransport '{}': stopped", self.name);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.attachment.lock().is_some()
    }

    fn is_registered(&self) -> bool {
        let guard = self.attachment.lock();
        match guard.as_ref() {
            Some(a) => self.hub.is_accepting() && self.hub.is_subscribed(&a.destination, a.id),
            None => false,
        }
    }

    async fn send(
        &self,
        destination: &str,
        message: ClusterMessage,
    ) -> Result<(), TransportError> {
        let sender = self.sender_id().ok_or(TransportError::NotRunning)?;
        if !self.hub.is_available() {
            return Err(TransportError::ConnectionLost("hub unavailable".to_string()));
        }
        self.hub.publish(destination, sender, message).await;
        Ok(())
    }
}
