//! Document file handler
//!
//! Ships data directory files (style documents) ahead of the catalog
//! event that references them. Uses a compact binary payload instead of
//! JSON so file bytes are not inflated.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use tracing::debug;

use super::{EventHandler, HandlerError};
use crate::events::{ClusterEvent, DocumentFile};
use crate::model::write_atomic;
use crate::toggle::ToggleSwitch;

#[derive(Encode, Decode)]
struct DocumentPayload {
    path: String,
    content: Vec<u8>,
}

/// Writes received documents under the data directory
pub struct DocumentHandler {
    root: PathBuf,
    producer: Arc<ToggleSwitch>,
}

impl DocumentHandler {
    pub const NAME: &'static str = "document";

    pub fn new(root: PathBuf, producer: Arc<ToggleSwitch>) -> Self {
        Self { root, producer }
    }
}

#[async_trait]
impl EventHandler for DocumentHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event: &ClusterEvent) -> bool {
        matches!(event, ClusterEvent::DocumentFileChanged { .. })
    }

    fn producer(&self) -> &ToggleSwitch {
        &self.producer
    }

    fn serialize(&self, event: &ClusterEvent) -> Result<Vec<u8>, HandlerError> {
        let ClusterEvent::DocumentFileChanged { file } = event else {
            return Err(HandlerError::Unsupported(event.kind().to_string()));
        };
        let payload = DocumentPayload {
            path: file.path.clone(),
            content: file.content.clone(),
        };
        bincode::encode_to_vec(&payload, bincode::config::standard())
            .map_err(|e| HandlerError::Serialize(e.to_string()))
    }

    fn deserialize(&self, payload: &[u8]) -> Result<ClusterEvent, HandlerError> {
        let (decoded, _): (DocumentPayload, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| HandlerError::Deserialize(e.to_string()))?;
        let file = DocumentFile::new(decoded.path, decoded.content)?;
        Ok(ClusterEvent::DocumentFileChanged { file })
    }

    async fn synchronize(
        &self,
        event: ClusterEvent,
        _properties: &BTreeMap<String, String>,
    ) -> Result<bool, HandlerError> {
        let ClusterEvent::DocumentFileChanged { file } = event else {
            return Err(HandlerError::Unsupported(event.kind().to_string()));
        };
        let target = self.root.join(file.relative_path()?);
        let content = file.content;
        let write_target = target.clone();
        tokio::task::spawn_blocking(move || write_atomic(&write_target, &content))
            .await
            .map_err(|e| HandlerError::Io(std::io::Error::other(e.to_string())))??;
        debug!("Wrote replicated document {:?}", target);
        Ok(true)
    }
}
