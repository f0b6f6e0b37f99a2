//! Cluster Member
//!
//! Wires the model, the cluster configuration, the handlers, the
//! transport and the listeners of one member together, in the order the
//! member must come up:
//!
//! 1. cluster configuration initialized, data directory state restored
//! 2. toggles subscribed to the lifecycle
//! 3. dispatch listeners attached ahead of the data directory persister
//! 4. consumer task running
//! 5. startup signal published, persisted toggle choices applied
//! 6. connection brought up according to the `connection` key

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::configuration::{
    keys, ClusterConfiguration, ConfigurationError, EnvOverrides, OverrideSource,
};
use crate::connection::ConnectionManager;
use crate::consumer::Consumer;
use crate::controller::Controller;
use crate::handlers::HandlerRegistry;
use crate::listener::{CatalogSyncListener, ConfigurationSyncListener, Publisher};
use crate::model::{Catalog, DataDirPersister, GeoServer, PersistenceSwitch};
use crate::toggle::{ApplicationEvent, Lifecycle, ToggleSwitch, ToggleType};
use crate::transport::{TcpTransport, Transport};

#[cfg(test)]
mod tests;

/// Member startup error types
#[derive(Debug)]
pub enum NodeError {
    /// Cluster configuration could not be initialized
    Configuration(ConfigurationError),
    /// Data directory could not be read
    Io(std::io::Error),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Configuration(e) => write!(f, "Cluster configuration error: {}", e),
            NodeError::Io(e) => write!(f, "Data directory error: {}", e),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Configuration(e) => Some(e),
            NodeError::Io(e) => Some(e),
        }
    }
}

impl From<ConfigurationError> for NodeError {
    fn from(e: ConfigurationError) -> Self {
        NodeError::Configuration(e)
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e)
    }
}

/// Builder for a [`ClusterNode`]
pub struct NodeBuilder {
    data_dir: PathBuf,
    overrides: Arc<dyn OverrideSource>,
    instance_name: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    connect_timeout: Duration,
    inbound_capacity: usize,
}

impl NodeBuilder {
    /// Member rooted at a data directory, overrides read from the environment
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            overrides: Arc::new(EnvOverrides),
            instance_name: None,
            transport: None,
            connect_timeout: Duration::from_secs(5),
            inbound_capacity: 1024,
        }
    }

    pub fn with_overrides(mut self, overrides: Arc<dyn OverrideSource>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Use this name instead of the persisted `instanceName`
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Use a prebuilt transport instead of a TCP one built from `brokerURL`
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// Bring the member up
    ///
    /// A broker that cannot be reached is not an error: the member starts
    /// disconnected and the `connection` key is downgraded.
    pub async fn start(self) -> Result<ClusterNode, NodeError> {
        let config_dir = ClusterConfiguration::resolve_dir(&self.data_dir, self.overrides.as_ref());
        let configuration = Arc::new(ClusterConfiguration::new(config_dir, self.overrides));
        configuration.init()?;
        if let Some(name) = self.instance_name {
            configuration.put(keys::INSTANCE_NAME, name);
        }
        let instance_name = configuration.instance_name();
        info!("Starting cluster member '{}'", instance_name);

        let catalog = Arc::new(Catalog::new(&self.data_dir));
        let geoserver = Arc::new(GeoServer::new(&self.data_dir));
        let persister = Arc::new(DataDirPersister::new(&self.data_dir));
        let snapshot = persister.load()?;
        info!(
            "Restored {} catalog objects and {} services from {:?}",
            snapshot.catalog.len(),
            snapshot.services.len(),
            self.data_dir
        );
        geoserver.restore(snapshot.global, snapshot.logging, snapshot.services);
        catalog.restore(snapshot.catalog);

        let lifecycle = Arc::new(Lifecycle::new());
        let producer = Arc::new(ToggleSwitch::new(ToggleType::Producer));
        let consumer_toggle = Arc::new(ToggleSwitch::new(ToggleType::Consumer));
        lifecycle.subscribe(producer.clone());
        lifecycle.subscribe(consumer_toggle.clone());

        let registry = Arc::new(HandlerRegistry::with_defaults(
            geoserver.clone(),
            catalog.clone(),
            producer.clone(),
        ));

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                TcpTransport::new(configuration.broker_url(), instance_name.clone())
                    .with_connect_timeout(self.connect_timeout),
            ),
        };
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity);
        let connection = Arc::new(ConnectionManager::new(
            transport.clone(),
            configuration.clone(),
            inbound_tx,
        ));

        let publisher = Arc::new(Publisher::new(
            registry.clone(),
            transport,
            configuration.clone(),
            producer.clone(),
        ));
        catalog.add_listener(Arc::new(CatalogSyncListener::new(
            catalog.clone(),
            publisher.clone(),
        )));
        geoserver.add_listener(Arc::new(ConfigurationSyncListener::new(publisher.clone())));

        let persistence = Arc::new(PersistenceSwitch::new(
            persister,
            catalog.clone(),
            geoserver.clone(),
        ));
        persistence.set_read_only(configuration.read_only());

        let (shutdown, _) = broadcast::channel(1);
        let consumer_task = Consumer::new(
            registry.clone(),
            consumer_toggle.clone(),
            configuration.clone(),
            connection.clone(),
        )
        .spawn(inbound_rx, shutdown.subscribe());

        lifecycle.publish(ApplicationEvent::ContextLoaded);
        for (kind, enable) in [
            (ToggleType::Producer, configuration.toggle_master()),
            (ToggleType::Consumer, configuration.toggle_slave()),
        ] {
            if !enable {
                warn!("The {} toggle is disabled by configuration", kind);
            }
            lifecycle.publish(ApplicationEvent::Toggle { enable, kind });
        }

        if connection.init().await {
            info!("Cluster member '{}' connected", instance_name);
        }

        let controller = Arc::new(Controller::new(
            configuration.clone(),
            lifecycle.clone(),
            connection.clone(),
            persistence.clone(),
        ));

        Ok(ClusterNode {
            configuration,
            catalog,
            geoserver,
            lifecycle,
            producer,
            consumer_toggle,
            registry,
            publisher,
            connection,
            persistence,
            controller,
            shutdown,
            consumer_task: Mutex::new(Some(consumer_task)),
        })
    }
}

/// One running cluster member
pub struct ClusterNode {
    configuration: Arc<ClusterConfiguration>,
    catalog: Arc<Catalog>,
    geoserver: Arc<GeoServer>,
    lifecycle: Arc<Lifecycle>,
    producer: Arc<ToggleSwitch>,
    consumer_toggle: Arc<ToggleSwitch>,
    registry: Arc<HandlerRegistry>,
    publisher: Arc<Publisher>,
    connection: Arc<ConnectionManager>,
    persistence: Arc<PersistenceSwitch>,
    controller: Arc<Controller>,
    shutdown: broadcast::Sender<()>,
    consumer_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterNode {
    pub fn builder(data_dir: impl Into<PathBuf>) -> NodeBuilder {
        NodeBuilder::new(data_dir)
    }

    pub fn configuration(&self) -> &Arc<ClusterConfiguration> {
        &self.configuration
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn geoserver(&self) -> &Arc<GeoServer> {
        &self.geoserver
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn producer(&self) -> &Arc<ToggleSwitch> {
        &self.producer
    }

    pub fn consumer_toggle(&self) -> &Arc<ToggleSwitch> {
        &self.consumer_toggle
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn persistence(&self) -> &Arc<PersistenceSwitch> {
        &self.persistence
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn instance_name(&self) -> String {
        self.configuration.instance_name()
    }

    /// Stop the consumer and disconnect
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let task = self.consumer_task.lock().take();
        let Some(task) = task else {
            return;
        };
        info!("Shutting down cluster member '{}'", self.instance_name());
        self.connection.cancel();
        let _ = self.shutdown.send(());
        if !self.connection.disconnect().await {
            warn!("Transport did not stop cleanly");
        }
        let _ = task.await;
    }
}
