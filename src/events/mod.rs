//! Cluster Event Model
//!
//! Typed events describing what changed on a cluster member. Events carry a
//! detached copy of the affected object (never a live handle into the local
//! model) and, for the modification variants, the property-level diff.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{CatalogInfo, GlobalSettings, LoggingSettings, ServiceSettings};

#[cfg(test)]
mod tests;

/// Event model error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The three diff sequences do not have the same length
    LengthMismatch {
        names: usize,
        old_values: usize,
        new_values: usize,
    },
    /// A document path escapes the data directory
    InvalidPath(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::LengthMismatch {
                names,
                old_values,
                new_values,
            } => write!(
                f,
                "Property diff length mismatch: {} names, {} old values, {} new values",
                names, old_values, new_values
            ),
            EventError::InvalidPath(path) => write!(f, "Invalid document path: {}", path),
        }
    }
}

impl std::error::Error for EventError {}

/// Raw form used to validate incoming diffs during deserialization
#[derive(Deserialize)]
struct RawPropertyDiff {
    names: Vec<String>,
    old_values: Vec<Value>,
    new_values: Vec<Value>,
}

/// Property-level changes of a modified object
///
/// Three parallel sequences that always have the same length: entry `i`
/// states that property `names[i]` went from `old_values[i]` to
/// `new_values[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPropertyDiff")]
pub struct PropertyDiff {
    names: Vec<String>,
    old_values: Vec<Value>,
    new_values: Vec<Value>,
}

impl TryFrom<RawPropertyDiff> for PropertyDiff {
    type Error = EventError;

    fn try_from(raw: RawPropertyDiff) -> Result<Self, Self::Error> {
        Self::from_parts(raw.names, raw.old_values, raw.new_values)
    }
}

impl PropertyDiff {
    /// Create an empty diff
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a diff from parallel sequences, rejecting unequal lengths
    pub fn from_parts(
        names: Vec<String>,
        old_values: Vec<Value>,
        new_values: Vec<Value>,
    ) -> Result<Self, EventError> {
        if names.len() != old_values.len() || names.len() != new_values.len() {
            return Err(EventError::LengthMismatch {
                names: names.len(),
                old_values: old_values.len(),
                new_values: new_values.len(),
            });
        }
        Ok(Self {
            names,
            old_values,
            new_values,
        })
    }

    /// Record a change
    ///
    /// A property recorded twice keeps its first old value and takes the
    /// latest new value.
    pub fn record(&mut self, name: impl Into<String>, old_value: Value, new_value: Value) {
        let name = name.into();
        if let Some(idx) = self.names.iter().position(|n| *n == name) {
            self.new_values[idx] = new_value;
        } else {
            self.names.push(name);
            self.old_values.push(old_value);
            self.new_values.push(new_value);
        }
    }

    /// Changed property names
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Values before the change
    pub fn old_values(&self) -> &[Value] {
        &self.old_values
    }

    /// Values after the change
    pub fn new_values(&self) -> &[Value] {
        &self.new_values
    }

    /// Number of changed properties
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate over `(name, new_value)` pairs in recording order
    pub fn changes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.new_values.iter())
    }

    /// Look up the new value of a property
    pub fn new_value(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.new_values[idx])
    }
}

/// A file from the data directory shipped alongside a catalog event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFile {
    /// Path relative to the data directory, `/` separated
    pub path: String,
    /// Raw file content
    pub content: Vec<u8>,
}

impl DocumentFile {
    /// Create a document, validating that the path stays inside the data dir
    pub fn new(path: impl Into<String>, content: Vec<u8>) -> Result<Self, EventError> {
        let doc = Self {
            path: path.into(),
            content,
        };
        doc.relative_path()?;
        Ok(doc)
    }

    /// Resolve the document path relative to a data directory root
    ///
    /// Absolute paths and parent components are rejected.
    pub fn relative_path(&self) -> Result<PathBuf, EventError> {
        let path = Path::new(&self.path);
        if self.path.is_empty() {
            return Err(EventError::InvalidPath(self.path.clone()));
        }
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => return Err(EventError::InvalidPath(self.path.clone())),
            }
        }
        if out.as_os_str().is_empty() {
            return Err(EventError::InvalidPath(self.path.clone()));
        }
        Ok(out)
    }
}

/// Kind tag of a cluster event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GlobalSettingsChanged,
    LoggingSettingsChanged,
    ServiceSettingsChanged,
    CatalogObjectAdded,
    CatalogObjectRemoved,
    CatalogObjectModified,
    CatalogObjectPostModified,
    DocumentFileChanged,
}

impl EventKind {
    /// Stable name used in message properties and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::GlobalSettingsChanged => "GlobalSettingsChanged",
            EventKind::LoggingSettingsChanged => "LoggingSettingsChanged",
            EventKind::ServiceSettingsChanged => "ServiceSettingsChanged",
            EventKind::CatalogObjectAdded => "CatalogObjectAdded",
            EventKind::CatalogObjectRemoved => "CatalogObjectRemoved",
            EventKind::CatalogObjectModified => "CatalogObjectModified",
            EventKind::CatalogObjectPostModified => "CatalogObjectPostModified",
            EventKind::DocumentFileChanged => "DocumentFileChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event replicated between cluster members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClusterEvent {
    /// Global settings were modified
    GlobalSettingsChanged {
        source: GlobalSettings,
        diff: PropertyDiff,
    },
    /// Logging settings were modified
    LoggingSettingsChanged {
        source: LoggingSettings,
        diff: PropertyDiff,
    },
    /// A service configuration was modified
    ServiceSettingsChanged {
        source: ServiceSettings,
        diff: PropertyDiff,
    },
    /// A catalog object was added
    CatalogObjectAdded { source: CatalogInfo },
    /// A catalog object was removed
    CatalogObjectRemoved { source: CatalogInfo },
    /// A catalog object is being modified
    CatalogObjectModified {
        source: CatalogInfo,
        diff: PropertyDiff,
    },
    /// A catalog object modification was committed
    CatalogObjectPostModified { source: CatalogInfo },
    /// A data directory file changed (style documents)
    DocumentFileChanged { file: DocumentFile },
}

impl ClusterEvent {
    /// Get the kind tag of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ClusterEvent::GlobalSettingsChanged { .. } => EventKind::GlobalSettingsChanged,
            ClusterEvent::LoggingSettingsChanged { .. } => EventKind::LoggingSettingsChanged,
            ClusterEvent::ServiceSettingsChanged { .. } => EventKind::ServiceSettingsChanged,
            ClusterEvent::CatalogObjectAdded { .. } => EventKind::CatalogObjectAdded,
            ClusterEvent::CatalogObjectRemoved { .. } => EventKind::CatalogObjectRemoved,
            ClusterEvent::CatalogObjectModified { .. } => EventKind::CatalogObjectModified,
            ClusterEvent::CatalogObjectPostModified { .. } => {
                EventKind::CatalogObjectPostModified
            }
            ClusterEvent::DocumentFileChanged { .. } => EventKind::DocumentFileChanged,
        }
    }

    /// Property diff carried by the modification variants
    pub fn diff(&self) -> Option<&PropertyDiff> {
        match self {
            ClusterEvent::GlobalSettingsChanged { diff, .. }
            | ClusterEvent::LoggingSettingsChanged { diff, .. }
            | ClusterEvent::ServiceSettingsChanged { diff, .. }
            | ClusterEvent::CatalogObjectModified { diff, .. } => Some(diff),
            _ => None,
        }
    }

    /// Identity of the affected object, for logging
    pub fn subject(&self) -> String {
        match self {
            ClusterEvent::GlobalSettingsChanged { source, .. } => source.id.clone(),
            ClusterEvent::LoggingSettingsChanged { source, .. } => source.id.clone(),
            ClusterEvent::ServiceSettingsChanged { source, .. } => {
                format!("{} ({})", source.name, source.id)
            }
            ClusterEvent::CatalogObjectAdded { source }
            | ClusterEvent::CatalogObjectRemoved { source }
            | ClusterEvent::CatalogObjectModified { source, .. }
            | ClusterEvent::CatalogObjectPostModified { source } => {
                format!("{} '{}' ({})", source.kind, source.name, source.id)
            }
            ClusterEvent::DocumentFileChanged { file } => file.path.clone(),
        }
    }

    /// Encode as JSON, the default handler payload format
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the JSON payload format
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
