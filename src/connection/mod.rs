//! Connection Manager
//!
//! Owns the transport lifecycle for one cluster member: bounded,
//! fixed-delay polling for registration on connect and for teardown on
//! disconnect. Waits are cancellable through [`ConnectionManager::cancel`].
//!
//! A failed connect at startup downgrades the persisted `connection` key
//! to `disabled`, so later restarts do not retry a broker that was known
//! to be unreachable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::configuration::{keys, ClusterConfiguration};
use crate::transport::{InboundEvent, Transport};


/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport stopped
    Disconnected,
    /// Transport is being started
    Connecting,
    /// Transport started, registration not yet checked
    Connected,
    /// Waiting for the broker to acknowledge the subscription
    RegistrationPending,
    /// Started and registered with the destination
    Registered,
    /// Transport is being stopped
    Disconnecting,
    /// Retry budget exhausted; the transport was stopped
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::RegistrationPending => "registration-pending",
            ConnectionState::Registered => "registered",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed attempt count and delay used while polling the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, wait: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            wait,
        }
    }

    /// Read `connection.retry` and `connection.maxwait`
    pub fn from_configuration(configuration: &ClusterConfiguration) -> Self {
        Self::new(
            configuration.connection_retry(),
            configuration.connection_max_wait(),
        )
    }

    /// Upper bound of the time spent waiting by one connect or disconnect
    pub fn budget(&self) -> Duration {
        self.wait * self.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            keys::DEFAULT_CONNECTION_RETRY,
            Duration::from_millis(keys::DEFAULT_CONNECTION_MAXWAIT),
        )
    }
}

/// Observer of transport listener failures
///
/// May be invoked several times for one underlying failure when the
/// transport retries internally.
#[async_trait]
pub trait ConnectionExceptionListener: Send + Sync {
    async fn handle_listener_setup_failure(&self, error: &str, recovered: bool);
}

/// Transport lifecycle owner
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    configuration: Arc<ClusterConfiguration>,
    policy: RetryPolicy,
    state: RwLock<ConnectionState>,
    /// Serializes connect and disconnect
    op_lock: Mutex<()>,
    cancel: watch::Sender<bool>,
    sink: mpsc::Sender<InboundEvent>,
    exception_listeners: RwLock<Vec<Arc<dyn ConnectionExceptionListener>>>,
}

impl ConnectionManager {
    /// Create a manager delivering inbound traffic to `sink`
    ///
    /// The retry policy is read from the configuration once, here.
    pub fn new(
        transport: Arc<dyn Transport>,
        configuration: Arc<ClusterConfiguration>,
        sink: mpsc::Sender<InboundEvent>,
    ) -> Self {
        let policy = RetryPolicy::from_configuration(&configuration);
        Self::with_policy(transport, configuration, sink, policy)
    }

    pub fn with_policy(
        transport: Arc<dyn Transport>,
        configuration: Arc<ClusterConfiguration>,
        sink: mpsc::Sender<InboundEvent>,
        policy: RetryPolicy,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            transport,
            configuration,
            policy,
            state: RwLock::new(ConnectionState::Disconnected),
            op_lock: Mutex::new(()),
            cancel,
            sink,
            exception_listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), state);
        if prev != state {
            debug!("Connection state {} -> {}", prev, state);
        }
    }

    /// Whether the transport is started
    pub fn is_running(&self) -> bool {
        self.transport.is_running()
    }

    /// Whether the transport is started and registered with the destination
    pub fn is_connected(&self) -> bool {
        self.transport.is_running() && self.transport.is_registered()
    }

    /// Register an observer of listener failures
    pub fn add_exception_listener(&self, listener: Arc<dyn ConnectionExceptionListener>) {
        self.exception_listeners.write().push(listener);
    }

    /// Abort the wait of an in-flight connect or disconnect
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Sleep for one retry interval; false when cancelled
    async fn wait(&self) -> bool {
        let mut cancelled = self.cancel.subscribe();
        if *cancelled.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.policy.wait) => true,
            _ = cancelled.wait_for(|c| *c) => false,
        }
    }

    /// Start the transport and wait for registration
    ///
    /// Returns true once the broker acknowledged the subscription. After
    /// the retry budget is exhausted (or on cancel) the transport is
    /// stopped again and false is returned.
    pub async fn connect(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.cancel.send_replace(false);

        if self.transport.is_running() {
            error!("Connection is already running");
            return false;
        }

        info!("Connecting...");
        self.set_state(ConnectionState::Connecting);
        let destination = self.configuration.topic_name();
        if let Err(e) = self.transport.start(&destination, self.sink.clone()).await {
            error!("Impossible to start a connection to '{}': {}", destination, e);
            self.shutdown().await;
            self.set_state(ConnectionState::Failed);
            return false;
        }
        self.set_state(ConnectionState::Connected);

        self.set_state(ConnectionState::RegistrationPending);
        let max = self.policy.attempts;
        for attempt in 1..=max {
            if self.transport.is_registered() {
                info!("Registered with destination '{}'", destination);
                self.set_state(ConnectionState::Registered);
                return true;
            }
            if attempt == max {
                break;
            }
            info!("Waiting for registration...({}/{})", attempt, max);
            if !self.wait().await {
                warn!("Connect cancelled");
                break;
            }
        }

        error!("Registration aborted due to a connection problem");
        self.shutdown().await;
        self.set_state(ConnectionState::Failed);
        false
    }

    /// Stop the transport and wait until it unregistered
    ///
    /// Returns true immediately when the transport is not running.
    pub async fn disconnect(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.cancel.send_replace(false);

        if !self.transport.is_running() {
            info!("Connection is already stopped");
            self.set_state(ConnectionState::Disconnected);
            return true;
        }

        info!("Disconnecting...");
        self.set_state(ConnectionState::Disconnecting);
        self.shutdown().await;

        let max = self.policy.attempts;
        for attempt in 1..=max {
            if !self.transport.is_running() && !self.transport.is_registered() {
                info!("Unregistered from the destination");
                warn!("Events published by other members while disconnected will be missed");
                self.set_state(ConnectionState::Disconnected);
                return true;
            }
            if attempt == max {
                break;
            }
            info!("Waiting for connection shutdown...({}/{})", attempt, max);
            if !self.wait().await {
                warn!("Disconnect cancelled");
                break;
            }
        }

        error!("Unable to stop the connection");
        self.set_state(if self.transport.is_running() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        });
        false
    }

    async fn shutdown(&self) {
        if let Err(e) = self.transport.stop().await {
            warn!("Error stopping transport '{}': {}", self.transport.name(), e);
        }
    }

    /// Bring-up connect honoring the persisted `connection` flag
    ///
    /// When the flag is enabled and the connect fails, the flag is forced
    /// to `disabled` and the configuration stored.
    pub async fn init(&self) -> bool {
        if !self.configuration.connection_enabled() {
            info!("Cluster connection disabled by configuration");
            return false;
        }
        if self.connect().await {
            return true;
        }

        error!("Unable to connect to the broker, forcing connection status to disabled");
        self.configuration.put(keys::CONNECTION, keys::DISABLED);
        if let Err(e) = self.configuration.store() {
            error!("Unable to store cluster configuration: {}", e);
        }
        false
    }

    /// Broadcast a listener failure reported by the transport
    pub async fn handle_listener_setup_failure(&self, error: &str, recovered: bool) {
        if recovered {
            warn!("Transport listener recovered from failure: {}", error);
        } else {
            error!("Transport listener failure: {}", error);
        }
        let listeners = self.exception_listeners.read().clone();
        for listener in listeners {
            listener.handle_listener_setup_failure(error, recovered).await;
        }
    }
}
