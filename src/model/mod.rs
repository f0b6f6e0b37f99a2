//! Configuration Model
//!
//! The in-process server state that cluster events are produced from and
//! applied to: global/logging/service settings, the catalog, edit
//! tracking and data directory persistence.

pub mod catalog;
pub mod persist;
pub mod property;
pub mod settings;

#[cfg(test)]
mod tests;

pub use catalog::{Catalog, CatalogError, CatalogInfo, CatalogKind, CatalogListener, STYLES_DIR};
pub use persist::{write_atomic, DataDirPersister, PersistenceSwitch, Snapshot};
pub use property::{Canonical, PropertyAccess, PropertyError, Tracked};
pub use settings::{
    ConfigurationListener, ContactInfo, CoverageAccess, GeoServer, GlobalSettings,
    ImagingSettings, LoggingSettings, ServiceSettings, SettingsError,
};
