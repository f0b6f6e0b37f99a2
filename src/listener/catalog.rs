//! Catalog change publisher

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{PublishError, Publisher};
use crate::events::{ClusterEvent, DocumentFile};
use crate::handlers::HandlerError;
use crate::model::{Canonical, Catalog, CatalogError, CatalogInfo, CatalogListener, Tracked};

/// Publishes catalog mutations
///
/// Errors are returned to the catalog so the mutation is rolled back.
/// Post-modify notifications are never published: every member
/// generates its own.
pub struct CatalogSyncListener {
    catalog: Arc<Catalog>,
    publisher: Arc<Publisher>,
}

impl CatalogSyncListener {
    pub fn new(catalog: Arc<Catalog>, publisher: Arc<Publisher>) -> Self {
        Self { catalog, publisher }
    }

    /// Send the style document ahead of the structural event
    async fn publish_document(&self, info: &CatalogInfo) -> Result<(), PublishError> {
        let Some(relative) = info.style_document() else {
            return Ok(());
        };
        let path = self.catalog.resolve(&relative);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No document at {:?} for style '{}'", path, info.name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let file = DocumentFile::new(relative, content).map_err(HandlerError::from)?;
        self.publisher
            .publish(ClusterEvent::DocumentFileChanged { file })
            .await?;
        Ok(())
    }

    async fn publish(&self, event: ClusterEvent) -> Result<(), CatalogError> {
        let subject = event.subject();
        self.publisher.publish(event).await.map_err(|e| {
            error!("Unable to publish {}: {}", subject, e);
            CatalogError::from(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl CatalogListener for CatalogSyncListener {
    async fn handle_add(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        if !self.publisher.is_enabled() {
            return Ok(());
        }
        let source = info.canonical();
        self.publish_document(&source).await.map_err(|e| {
            error!("Unable to publish document of '{}': {}", source.name, e);
            CatalogError::from(e)
        })?;
        self.publish(ClusterEvent::CatalogObjectAdded { source }).await
    }

    async fn handle_remove(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        if !self.publisher.is_enabled() {
            return Ok(());
        }
        self.publish(ClusterEvent::CatalogObjectRemoved {
            source: info.canonical(),
        })
        .await
    }

    async fn handle_modify(&self, info: &Tracked<CatalogInfo>) -> Result<(), CatalogError> {
        if !self.publisher.is_enabled() {
            return Ok(());
        }
        if info.is_unchanged() {
            return Ok(());
        }
        let source = info.canonical();
        self.publish_document(&source).await.map_err(|e| {
            error!("Unable to publish document of '{}': {}", source.name, e);
            CatalogError::from(e)
        })?;
        self.publish(ClusterEvent::CatalogObjectModified {
            diff: info.diff().clone(),
            source,
        })
        .await
    }
}
