//! Settings change publisher

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::Publisher;
use crate::events::ClusterEvent;
use crate::model::{
    Canonical, ConfigurationListener, GlobalSettings, LoggingSettings, ServiceSettings, Tracked,
};

/// Publishes global, logging and service settings changes
///
/// Settings saves cannot be vetoed, so publish failures are only logged.
pub struct ConfigurationSyncListener {
    publisher: Arc<Publisher>,
}

impl ConfigurationSyncListener {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self { publisher }
    }

    async fn publish(&self, event: ClusterEvent) {
        let subject = event.subject();
        if let Err(e) = self.publisher.publish(event).await {
            error!("Unable to publish {}: {}", subject, e);
        }
    }
}

#[async_trait]
impl ConfigurationListener for ConfigurationSyncListener {
    async fn handle_global_change(&self, global: &Tracked<GlobalSettings>) {
        if global.is_unchanged() {
            return;
        }
        self.publish(ClusterEvent::GlobalSettingsChanged {
            source: global.canonical(),
            diff: global.diff().clone(),
        })
        .await;
    }

    async fn handle_logging_change(&self, logging: &Tracked<LoggingSettings>) {
        if logging.is_unchanged() {
            return;
        }
        self.publish(ClusterEvent::LoggingSettingsChanged {
            source: logging.canonical(),
            diff: logging.diff().clone(),
        })
        .await;
    }

    async fn handle_service_change(&self, service: &Tracked<ServiceSettings>) {
        if service.is_unchanged() {
            return;
        }
        self.publish(ClusterEvent::ServiceSettingsChanged {
            source: service.canonical(),
            diff: service.diff().clone(),
        })
        .await;
    }
}
