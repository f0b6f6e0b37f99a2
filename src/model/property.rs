//! Property access by name
//!
//! Model objects are plain serde structs. Setting a property by name goes
//! through their JSON representation, so no per-type setter tables are
//! needed: dotted names (`contact.person`) walk nested objects.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::events::PropertyDiff;

/// Property access error types
#[derive(Debug)]
pub enum PropertyError {
    /// The object has no property with this name
    Unknown(String),
    /// The value does not fit the property type
    InvalidValue { name: String, reason: String },
    /// The object could not be converted to or from its JSON form
    Serde(serde_json::Error),
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyError::Unknown(name) => write!(f, "Unknown property: {}", name),
            PropertyError::InvalidValue { name, reason } => {
                write!(f, "Invalid value for property '{}': {}", name, reason)
            }
            PropertyError::Serde(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PropertyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PropertyError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PropertyError {
    fn from(e: serde_json::Error) -> Self {
        PropertyError::Serde(e)
    }
}

/// Name-based property access for serde model objects
pub trait PropertyAccess: Serialize + DeserializeOwned + Sized {
    /// Read a property by (possibly dotted) name
    fn get_property(&self, name: &str) -> Result<Value, PropertyError> {
        let root = serde_json::to_value(self)?;
        let mut node = &root;
        for part in name.split('.') {
            node = node
                .get(part)
                .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        }
        Ok(node.clone())
    }

    /// Set a property by (possibly dotted) name
    ///
    /// The property must already exist on the object; the whole object is
    /// re-validated after the assignment.
    fn set_property(&mut self, name: &str, value: &Value) -> Result<(), PropertyError> {
        let mut root = serde_json::to_value(&*self)?;
        {
            let mut node = &mut root;
            for part in name.split('.') {
                node = node
                    .get_mut(part)
                    .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
            }
            *node = value.clone();
        }
        *self = serde_json::from_value(root).map_err(|e| PropertyError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Apply every `(name, new_value)` pair of a diff in order
    fn apply_diff(&mut self, diff: &PropertyDiff) -> Result<(), PropertyError> {
        for (name, value) in diff.changes() {
            self.set_property(name, value)?;
        }
        Ok(())
    }
}

impl<T: Serialize + DeserializeOwned> PropertyAccess for T {}

/// Plain-data view of a possibly wrapped model object
pub trait Canonical {
    type Target;

    /// Return the underlying configuration object as plain data
    fn canonical(&self) -> Self::Target;
}

/// A model object under edit
///
/// Records every property assignment as a diff while keeping the value it
/// started from. Listeners receive this wrapper; anything that needs to
/// serialize the object takes its [`Canonical`] form instead.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    original: T,
    current: T,
    diff: PropertyDiff,
}

impl<T: PropertyAccess + Clone> Tracked<T> {
    /// Start tracking a value with no recorded changes
    pub fn new(value: T) -> Self {
        Self {
            original: value.clone(),
            current: value,
            diff: PropertyDiff::new(),
        }
    }

    /// Assign a property and record the change
    pub fn set<V: Serialize>(&mut self, name: &str, value: V) -> Result<(), PropertyError> {
        let value = serde_json::to_value(value)?;
        self.set_value(name, value)
    }

    /// Assign a property from an already encoded value
    pub fn set_value(&mut self, name: &str, value: Value) -> Result<(), PropertyError> {
        let old = self.current.get_property(name)?;
        self.current.set_property(name, &value)?;
        self.diff.record(name, old, value);
        Ok(())
    }

    /// Apply a diff produced elsewhere, recording each change
    pub fn apply(&mut self, diff: &PropertyDiff) -> Result<(), PropertyError> {
        for (name, value) in diff.changes() {
            self.set_value(name, value.clone())?;
        }
        Ok(())
    }

    /// Value before any recorded change
    pub fn original(&self) -> &T {
        &self.original
    }

    /// Value with the recorded changes applied
    pub fn current(&self) -> &T {
        &self.current
    }

    /// Recorded changes
    pub fn diff(&self) -> &PropertyDiff {
        &self.diff
    }

    /// True when no property was assigned
    pub fn is_unchanged(&self) -> bool {
        self.diff.is_empty()
    }

    /// Consume the wrapper, keeping the edited value
    pub fn into_inner(self) -> T {
        self.current
    }
}

impl<T: PropertyAccess + Clone> Canonical for Tracked<T> {
    type Target = T;

    fn canonical(&self) -> T {
        self.current.clone()
    }
}
