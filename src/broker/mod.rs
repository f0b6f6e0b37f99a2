//! Embedded Relay Broker
//!
//! A small topic relay that cluster members can connect to with
//! [`TcpTransport`](crate::transport::TcpTransport). Every message
//! published on a destination is delivered to every other subscriber of
//! that destination, in the order the broker received it.
//!
//! The broker runs as master or slave. A slave listens but refuses
//! clients, so members configured with a failover URL move on to the
//! master. Operators drive the lifecycle through [`BrokerService`],
//! locally or over the management socket.

mod client;
pub mod management;

pub use management::{ManagementClient, ManagementCommand, ManagementServer};

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::protocol::Frame;
use crate::transport::{ClusterMessage, TransportError};

#[cfg(test)]
mod tests;

/// Broker error types
#[derive(Debug)]
pub enum BrokerError {
    /// IO error (bind, accept, management socket)
    Io(std::io::Error),
    /// Wire protocol error
    Transport(TransportError),
    /// Management call failed on the broker side
    Management(String),
    /// Unknown role or command name
    Invalid(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Io(e) => write!(f, "IO error: {}", e),
            BrokerError::Transport(e) => write!(f, "Protocol error: {}", e),
            BrokerError::Management(msg) => write!(f, "Management error: {}", msg),
            BrokerError::Invalid(msg) => write!(f, "Invalid value: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Io(e) => Some(e),
            BrokerError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(e)
    }
}

impl From<TransportError> for BrokerError {
    fn from(e: TransportError) -> Self {
        BrokerError::Transport(e)
    }
}

/// Broker role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerRole {
    #[default]
    Master,
    Slave,
}

impl BrokerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerRole::Master => "master",
            BrokerRole::Slave => "slave",
        }
    }
}

impl FromStr for BrokerRole {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(BrokerRole::Master),
            "slave" => Ok(BrokerRole::Slave),
            other => Err(BrokerError::Invalid(format!("broker role '{}'", other))),
        }
    }
}

impl fmt::Display for BrokerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Identifier sent to clients in the handshake
    pub broker_id: String,
    /// Client listener address
    pub bind: SocketAddr,
    /// Master or slave
    pub role: BrokerRole,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_id: "clustersync".to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 61616)),
            role: BrokerRole::Master,
        }
    }
}

/// Operator control of a broker process
#[async_trait]
pub trait BrokerService: Send + Sync {
    /// Whether the broker is accepting connections
    fn is_started(&self) -> bool;

    /// Whether the broker runs as a slave
    fn is_slave(&self) -> bool;

    /// Start and wait until the listener is bound
    async fn start(&self) -> Result<(), BrokerError>;

    /// Stop and wait until the listener is closed
    async fn stop(&self) -> Result<(), BrokerError>;

    /// Start in the background
    fn async_start(&self);

    /// Stop in the background
    fn async_stop(&self);
}

struct Subscriber {
    conn_id: u64,
    tx: mpsc::Sender<Frame>,
}

struct Inner {
    config: BrokerConfig,
    topics: DashMap<String, Vec<Subscriber>>,
    next_conn_id: AtomicU64,
    relayed: AtomicU64,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
}

impl Inner {
    fn subscribe(&self, destination: &str, conn_id: u64, tx: mpsc::Sender<Frame>) {
        let mut subs = self.topics.entry(destination.to_string()).or_default();
        if !subs.iter().any(|s| s.conn_id == conn_id) {
            subs.push(Subscriber { conn_id, tx });
        }
    }

    fn unsubscribe_all(&self, conn_id: u64) {
        for mut subs in self.topics.iter_mut() {
            subs.retain(|s| s.conn_id != conn_id);
        }
        self.topics.retain(|_, subs| !subs.is_empty());
    }

    async fn relay(&self, destination: &str, sender: u64, message: ClusterMessage) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<_> = self
            .topics
            .get(destination)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.conn_id != sender)
                    .map(|s| s.tx.clone())
                    .collect()
            })
            .unwrap_or_default();

        for tx in targets {
            let frame = Frame::Deliver {
                destination: destination.to_string(),
                message: message.clone(),
            };
            if tx.send(frame).await.is_err() {
                debug!("Dropping delivery to closed connection");
            }
        }
    }
}

/// The relay broker
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                topics: DashMap::new(),
                next_conn_id: AtomicU64::new(1),
                relayed: AtomicU64::new(0),
                started: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                shutdown: Mutex::new(None),
                accept_task: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Bound listener address while started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// `tcp://` URL clients can use while started
    pub fn url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("tcp://{}", addr))
    }

    /// Number of subscribers on a destination
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.inner
            .topics
            .get(destination)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Number of publishes received
    pub fn relayed(&self) -> u64 {
        self.inner.relayed.load(Ordering::Relaxed)
    }

    async fn accept_loop(
        inner: Arc<Inner>,
        listener: TcpListener,
        shutdown: broadcast::Sender<()>,
    ) {
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New broker connection from {}", addr);
                        let conn_id = inner.next_conn_id.fetch_add(1, Ordering::SeqCst);
                        client::spawn(inner.clone(), stream, addr, conn_id, shutdown.subscribe());
                    }
                    Err(e) => {
                        error!("Failed to accept broker connection: {}", e);
                    }
                },
                result = shutdown_rx.recv() => match result {
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    _ => break,
                },
            }
        }
        debug!("Broker accept loop stopped");
    }
}

#[async_trait]
impl BrokerService for Broker {
    fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    fn is_slave(&self) -> bool {
        self.inner.config.role == BrokerRole::Slave
    }

    async fn start(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_started() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.inner.config.bind).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(Self::accept_loop(
            self.inner.clone(),
            listener,
            shutdown.clone(),
        ));

        *self.inner.local_addr.lock() = Some(local_addr);
        *self.inner.shutdown.lock() = Some(shutdown);
        *self.inner.accept_task.lock() = Some(task);
        self.inner.started.store(true, Ordering::SeqCst);
        info!(
            "Broker '{}' ({}) listening on {}",
            self.inner.config.broker_id, self.inner.config.role, local_addr
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.is_started() {
            return Ok(());
        }

        self.inner.started.store(false, Ordering::SeqCst);
        let shutdown = self.inner.shutdown.lock().take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        let task = self.inner.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Broker accept task ended abnormally: {}", e);
            }
        }
        *self.inner.local_addr.lock() = None;
        info!("Broker '{}' stopped", self.inner.config.broker_id);
        Ok(())
    }

    fn async_start(&self) {
        let broker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = broker.start().await {
                error!("Asynchronous broker start failed: {}", e);
            }
        });
    }

    fn async_stop(&self) {
        let broker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = broker.stop().await {
                error!("Asynchronous broker stop failed: {}", e);
            }
        });
    }
}
