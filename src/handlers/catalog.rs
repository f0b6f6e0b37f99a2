//! Catalog handlers
//!
//! One handler per catalog event kind. Replays are idempotent: adding an
//! object that already exists or removing one that is gone is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::{EventHandler, HandlerError, PURGE_PROPERTY};
use crate::configuration::parse_flag;
use crate::events::{ClusterEvent, EventKind, PropertyDiff};
use crate::model::{Catalog, CatalogError, CatalogInfo, CatalogKind};
use crate::toggle::ToggleSwitch;

/// Applies one kind of catalog event
pub struct CatalogEventHandler {
    name: &'static str,
    kind: EventKind,
    catalog: Arc<Catalog>,
    producer: Arc<ToggleSwitch>,
}

impl CatalogEventHandler {
    fn new(
        name: &'static str,
        kind: EventKind,
        catalog: Arc<Catalog>,
        producer: Arc<ToggleSwitch>,
    ) -> Self {
        Self {
            name,
            kind,
            catalog,
            producer,
        }
    }

    pub fn add(catalog: Arc<Catalog>, producer: Arc<ToggleSwitch>) -> Self {
        Self::new("catalog-add", EventKind::CatalogObjectAdded, catalog, producer)
    }

    pub fn remove(catalog: Arc<Catalog>, producer: Arc<ToggleSwitch>) -> Self {
        Self::new(
            "catalog-remove",
            EventKind::CatalogObjectRemoved,
            catalog,
            producer,
        )
    }

    pub fn modify(catalog: Arc<Catalog>, producer: Arc<ToggleSwitch>) -> Self {
        Self::new(
            "catalog-modify",
            EventKind::CatalogObjectModified,
            catalog,
            producer,
        )
    }

    pub fn post_modify(catalog: Arc<Catalog>, producer: Arc<ToggleSwitch>) -> Self {
        Self::new(
            "catalog-post-modify",
            EventKind::CatalogObjectPostModified,
            catalog,
            producer,
        )
    }

    async fn add_object(&self, source: CatalogInfo) -> Result<bool, HandlerError> {
        if self.catalog.contains(&source.id) {
            debug!("{} '{}' already present, skipping add", source.kind, source.name);
            return Ok(false);
        }
        self.catalog.add(source).await?;
        Ok(true)
    }

    async fn remove_object(
        &self,
        source: CatalogInfo,
        properties: &BTreeMap<String, String>,
    ) -> Result<bool, HandlerError> {
        let removed = match self.catalog.remove(&source.id).await {
            Ok(removed) => removed,
            Err(CatalogError::NotFound(_)) => {
                debug!("{} '{}' already gone, skipping remove", source.kind, source.name);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let purge = properties
            .get(PURGE_PROPERTY)
            .and_then(|v| parse_flag(v))
            .unwrap_or(false);
        if purge && removed.kind == CatalogKind::Style {
            // The structural remove already happened; a leftover file is only logged
            if let Err(e) = self.catalog.delete_style_document(&removed).await {
                error!("Unable to purge style '{}': {}", removed.name, e);
            }
        }
        Ok(true)
    }

    async fn modify_object(
        &self,
        source: CatalogInfo,
        diff: PropertyDiff,
    ) -> Result<bool, HandlerError> {
        let mut edit = match self.catalog.edit(&source.id) {
            Ok(edit) => edit,
            Err(CatalogError::NotFound(_)) => {
                warn!(
                    "{} '{}' unknown locally, cannot apply modification",
                    source.kind, source.name
                );
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        edit.apply(&diff)?;
        self.catalog.save(edit).await?;
        Ok(true)
    }

    async fn post_modify_object(&self, source: CatalogInfo) -> Result<bool, HandlerError> {
        match self.catalog.get(&source.id) {
            Some(local) => {
                self.catalog.fire_post_modified(&local).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl EventHandler for CatalogEventHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        20
    }

    fn can_handle(&self, event: &ClusterEvent) -> bool {
        event.kind() == self.kind
    }

    fn producer(&self) -> &ToggleSwitch {
        &self.producer
    }

    async fn synchronize(
        &self,
        event: ClusterEvent,
        properties: &BTreeMap<String, String>,
    ) -> Result<bool, HandlerError> {
        match event {
            ClusterEvent::CatalogObjectAdded { source } if self.kind == EventKind::CatalogObjectAdded => {
                self.add_object(source).await
            }
            ClusterEvent::CatalogObjectRemoved { source }
                if self.kind == EventKind::CatalogObjectRemoved =>
            {
                self.remove_object(source, properties).await
            }
            ClusterEvent::CatalogObjectModified { source, diff }
                if self.kind == EventKind::CatalogObjectModified =>
            {
                self.modify_object(source, diff).await
            }
            ClusterEvent::CatalogObjectPostModified { source }
                if self.kind == EventKind::CatalogObjectPostModified =>
            {
                self.post_modify_object(source).await
            }
            other => Err(HandlerError::Unsupported(other.kind().to_string())),
        }
    }
}
