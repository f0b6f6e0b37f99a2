//! ClusterSync - catalog and configuration replication between members
//!
//! Every member of a cluster publishes its catalog and configuration
//! changes on a shared topic and applies the changes published by the
//! other members, so that all members converge on the same state.

pub mod broker;
pub mod config;
pub mod configuration;
pub mod connection;
pub mod consumer;
pub mod controller;
pub mod events;
pub mod handlers;
pub mod listener;
pub mod model;
pub mod node;
pub mod toggle;
pub mod transport;

pub use broker::{Broker, BrokerConfig, BrokerRole, BrokerService};
pub use config::Config;
pub use configuration::ClusterConfiguration;
pub use connection::{ConnectionManager, ConnectionState, RetryPolicy};
pub use controller::Controller;
pub use events::{ClusterEvent, EventKind, PropertyDiff};
pub use handlers::{EventHandler, HandlerRegistry};
pub use listener::Publisher;
pub use model::{Catalog, CatalogInfo, GeoServer};
pub use node::{ClusterNode, NodeBuilder};
pub use toggle::{ToggleSwitch, ToggleType};
pub use transport::{ClusterMessage, Transport};
