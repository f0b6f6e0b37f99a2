//! Settings handler
//!
//! Applies global, logging and service settings changes by replaying the
//! property diff on the local object and saving it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{EventHandler, HandlerError};
use crate::events::{ClusterEvent, PropertyDiff};
use crate::model::{GeoServer, GlobalSettings, ServiceSettings};
use crate::toggle::ToggleSwitch;

/// Handler for the settings event family
pub struct GeoServerHandler {
    geoserver: Arc<GeoServer>,
    producer: Arc<ToggleSwitch>,
}

impl GeoServerHandler {
    pub const NAME: &'static str = "geoserver";

    pub fn new(geoserver: Arc<GeoServer>, producer: Arc<ToggleSwitch>) -> Self {
        Self {
            geoserver,
            producer,
        }
    }

    async fn apply_global(
        &self,
        source: GlobalSettings,
        diff: &PropertyDiff,
    ) -> Result<bool, HandlerError> {
        let mut edit = self.geoserver.edit_global();
        edit.apply(diff)?;
        // Nested blocks travel whole on the source object
        edit.set("contact", &source.contact)?;
        edit.set("coverageAccess", &source.coverage_access)?;
        edit.set("imaging", &source.imaging)?;
        self.geoserver.save_global(edit).await;
        Ok(true)
    }

    fn local_service(&self, source: &ServiceSettings) -> Option<ServiceSettings> {
        self.geoserver
            .service(&source.id)
            .or_else(|| {
                self.geoserver
                    .service_by_name(&source.name, source.workspace.as_deref())
            })
    }

    async fn apply_service(
        &self,
        source: ServiceSettings,
        diff: &PropertyDiff,
    ) -> Result<bool, HandlerError> {
        let Some(local) = self.local_service(&source) else {
            info!(
                "Service '{}' unknown locally, adding replicated copy",
                source.name
            );
            self.geoserver.add_service(source).await?;
            return Ok(true);
        };

        let mut edit = self.geoserver.edit_service(&local.id)?;
        for (name, value) in diff.changes() {
            // ids are member-local
            if name == "id" {
                continue;
            }
            edit.set_value(name, value.clone())?;
        }
        self.geoserver.save_service(edit).await?;
        Ok(true)
    }
}

#[async_trait]
impl EventHandler for GeoServerHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, event: &ClusterEvent) -> bool {
        matches!(
            event,
            ClusterEvent::GlobalSettingsChanged { .. }
                | ClusterEvent::LoggingSettingsChanged { .. }
                | ClusterEvent::ServiceSettingsChanged { .. }
        )
    }

    fn producer(&self) -> &ToggleSwitch {
        &self.producer
    }

    async fn synchronize(
        &self,
        event: ClusterEvent,
        _properties: &BTreeMap<String, String>,
    ) -> Result<bool, HandlerError> {
        match event {
            ClusterEvent::GlobalSettingsChanged { source, diff } => {
                self.apply_global(source, &diff).await
            }
            ClusterEvent::LoggingSettingsChanged { diff, .. } => {
                let mut edit = self.geoserver.edit_logging();
                edit.apply(&diff)?;
                self.geoserver.save_logging(edit).await;
                Ok(true)
            }
            ClusterEvent::ServiceSettingsChanged { source, diff } => {
                self.apply_service(source, &diff).await
            }
            other => Err(HandlerError::Unsupported(other.kind().to_string())),
        }
    }
}

