//! Inbound Consumer
//!
//! One task per member drains the transport sink and applies messages
//! strictly in arrival order. A message that cannot be handled is logged
//! and skipped so later messages are still serviced.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::configuration::ClusterConfiguration;
use crate::connection::ConnectionManager;
use crate::handlers::HandlerRegistry;
use crate::toggle::ToggleSwitch;
use crate::transport::{ClusterMessage, InboundEvent};


/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A handler changed the local model
    Applied,
    /// A handler ran but had nothing to change
    Unchanged,
    /// The consumer toggle is off
    Disabled,
    /// Published by this member
    OwnOrigin,
    /// Decoding or applying failed
    Failed,
    /// A transport listener failure was forwarded
    ListenerFailure,
}

/// Applies inbound messages to the local model
pub struct Consumer {
    registry: Arc<HandlerRegistry>,
    toggle: Arc<ToggleSwitch>,
    configuration: Arc<ClusterConfiguration>,
    connection: Arc<ConnectionManager>,
}

impl Consumer {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        toggle: Arc<ToggleSwitch>,
        configuration: Arc<ClusterConfiguration>,
        connection: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            registry,
            toggle,
            configuration,
            connection,
        }
    }

    /// Run the consumer loop until shutdown or until every sender is gone
    pub fn spawn(
        self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Consumer started");
            loop {
                tokio::select! {
                    event = inbound.recv() => match event {
                        Some(event) => {
                            self.handle(event).await;
                        }
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
            info!("Consumer stopped");
        })
    }

    /// Process one inbound event
    pub async fn handle(&self, event: InboundEvent) -> Outcome {
        match event {
            InboundEvent::Message(message) => self.apply(message).await,
            InboundEvent::ListenerFailure { error, recovered } => {
                self.connection
                    .handle_listener_setup_failure(&error, recovered)
                    .await;
                Outcome::ListenerFailure
            }
        }
    }

    async fn apply(&self, message: ClusterMessage) -> Outcome {
        if !self.toggle.is_enabled() {
            debug!("Consumer disabled, discarding message for '{}'", message.handler);
            return Outcome::Disabled;
        }
        if message.origin() == Some(self.configuration.instance_name().as_str()) {
            debug!("Skipping message published by this member");
            return Outcome::OwnOrigin;
        }

        match self.registry.synchronize(&message).await {
            Ok(true) => Outcome::Applied,
            Ok(false) => Outcome::Unchanged,
            Err(e) => {
                error!(
                    "Unable to apply message from '{}' via '{}': {}",
                    message.origin().unwrap_or("unknown"),
                    message.handler,
                    e
                );
                Outcome::Failed
            }
        }
    }
}
