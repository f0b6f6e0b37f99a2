//! TCP transport
//!
//! Client side of the relay broker protocol. A background task owns the
//! socket, re-establishes it with exponential backoff after failures and
//! reports every loss to the consumer as a listener failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{parse_broker_url, write_frame, Frame, FrameReader, PROTOCOL_VERSION};
use super::{ClusterMessage, InboundEvent, Transport, TransportError};

/// Commands sent to the connection task
#[derive(Debug)]
enum Command {
    /// Publish a message and report the write outcome
    Publish {
        destination: String,
        message: ClusterMessage,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Close the connection and end the task
    Shutdown,
}

struct Shared {
    running: AtomicBool,
    registered: AtomicBool,
}

struct Running {
    command_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Transport connected to a relay broker over TCP
pub struct TcpTransport {
    broker_url: String,
    client_id: String,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl TcpTransport {
    pub fn new(broker_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: client_id.into(),
            connect_timeout: Duration::from_secs(10),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                registered: AtomicBool::new(false),
            }),
            running: Mutex::new(None),
        }
    }

    /// Set the TCP connect/handshake timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    /// Run the connection loop with reconnection
    async fn connection_loop(
        addr: String,
        client_id: String,
        destination: String,
        connect_timeout: Duration,
        shared: Arc<Shared>,
        mut command_rx: mpsc::Receiver<Command>,
        sink: mpsc::Sender<InboundEvent>,
    ) {
        let mut retry_interval = Duration::from_millis(500);
        let max_retry = Duration::from_secs(30);

        loop {
            debug!("TcpTransport '{}': Connecting to {}", client_id, addr);

            let result = Self::connect_and_run(
                &addr,
                &client_id,
                &destination,
                connect_timeout,
                &shared,
                &mut command_rx,
                &sink,
            )
            .await;
            shared.registered.store(false, Ordering::SeqCst);

            match result {
                Ok(()) => {
                    info!("TcpTransport '{}': Disconnected gracefully", client_id);
                    return;
                }
                Err(e) => {
                    error!("TcpTransport '{}': Connection failed: {}", client_id, e);
                    let _ = sink
                        .send(InboundEvent::ListenerFailure {
                            error: e.to_string(),
                            recovered: false,
                        })
                        .await;

                    debug!(
                        "TcpTransport '{}': Reconnecting in {:?}",
                        client_id, retry_interval
                    );

                    // Keep serving commands while backing off so publishers fail fast
                    let sleep = tokio::time::sleep(retry_interval);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => break,
                            cmd = command_rx.recv() => match cmd {
                                Some(Command::Publish { ack, .. }) => {
                                    let _ = ack.send(Err(TransportError::NotConnected));
                                }
                                Some(Command::Shutdown) | None => {
                                    info!("TcpTransport '{}': Shutdown requested", client_id);
                                    return;
                                }
                            }
                        }
                    }
                    retry_interval = std::cmp::min(retry_interval * 2, max_retry);
                }
            }
        }
    }

    /// Connect to the broker, subscribe and run the message loop
    async fn connect_and_run(
        addr: &str,
        client_id: &str,
        destination: &str,
        connect_timeout: Duration,
        shared: &Shared,
        command_rx: &mut mpsc::Receiver<Command>,
        sink: &mpsc::Sender<InboundEvent>,
    ) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let _ = stream.set_nodelay(true);

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        write_frame(
            &mut write_half,
            &Frame::Hello {
                client_id: client_id.to_string(),
                version: PROTOCOL_VERSION,
            },
        )
        .await?;

        match tokio::time::timeout(connect_timeout, reader.next_frame())
            .await
            .map_err(|_| TransportError::Timeout)??
        {
            Some(Frame::HelloAck { broker_id, version }) => {
                if version != PROTOCOL_VERSION {
                    return Err(TransportError::Rejected(format!(
                        "Protocol version mismatch: {} vs {}",
                        version, PROTOCOL_VERSION
                    )));
                }
                debug!("TcpTransport '{}': Connected to broker '{}'", client_id, broker_id);
            }
            Some(Frame::Rejected { reason }) => return Err(TransportError::Rejected(reason)),
            Some(other) => {
                return Err(TransportError::Decode(format!(
                    "expected HelloAck, got {}",
                    other.type_name()
                )))
            }
            None => return Err(TransportError::ConnectionLost("Connection closed".to_string())),
        }

        write_frame(
            &mut write_half,
            &Frame::Subscribe {
                destination: destination.to_string(),
            },
        )
        .await?;

        let mut ping_timer = tokio::time::interval(Duration::from_secs(15));
        ping_timer.reset();

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::Publish { destination, message, ack }) => {
                            let result = write_frame(
                                &mut write_half,
                                &Frame::Publish { destination, message },
                            )
                            .await;
                            let failed = result.as_ref().err().map(|e| e.to_string());
                            let _ = ack.send(result);
                            if let Some(e) = failed {
                                return Err(TransportError::ConnectionLost(e));
                            }
                        }
                        Some(Command::Shutdown) | None => {
                            let _ = write_frame(&mut write_half, &Frame::Goodbye).await;
                            return Ok(());
                        }
                    }
                }

                frame = reader.next_frame() => {
                    match frame? {
                        Some(Frame::Subscribed { destination }) => {
                            info!("TcpTransport '{}': Registered on '{}'", client_id, destination);
                            shared.registered.store(true, Ordering::SeqCst);
                        }
                        Some(Frame::Deliver { message, .. }) => {
                            if sink.send(InboundEvent::Message(message)).await.is_err() {
                                warn!("TcpTransport '{}': consumer gone, dropping message", client_id);
                            }
                        }
                        Some(Frame::Ping) => {
                            write_frame(&mut write_half, &Frame::Pong).await?;
                        }
                        Some(Frame::Pong) => {
                            debug!("TcpTransport '{}': Pong received", client_id);
                        }
                        Some(Frame::Goodbye) | None => {
                            return Err(TransportError::ConnectionLost("Broker disconnected".to_string()));
                        }
                        Some(other) => {
                            debug!("TcpTransport '{}': ignoring {}", client_id, other.type_name());
                        }
                    }
                }

                _ = ping_timer.tick() => {
                    write_frame(&mut write_half, &Frame::Ping).await?;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        &self.client_id
    }

    async fn start(
        &self,
        destination: &str,
        sink: mpsc::Sender<InboundEvent>,
    ) -> Result<(), TransportError> {
        let addr = parse_broker_url(&self.broker_url)?;
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = mpsc::channel(256);
        let task = tokio::spawn(Self::connection_loop(
            addr,
            self.client_id.clone(),
            destination.to_string(),
            self.connect_timeout,
            self.shared.clone(),
            command_rx,
            sink,
        ));
        *running = Some(Running { command_tx, task });
        self.shared.running.store(true, Ordering::SeqCst);
        info!("TcpTransport '{}': Started on '{}'", self.client_id, destination);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let running = self.running.lock().take();
        let Some(Running { command_tx, task }) = running else {
            return Ok(());
        };
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = command_tx.send(Command::Shutdown).await;
        match tokio::time::timeout(self.connect_timeout, task).await {
            Ok(_) => {}
            Err(_) => warn!("TcpTransport '{}': connection task did not stop in time", self.client_id),
        }
        self.shared.registered.store(false, Ordering::SeqCst);
        info!("TcpTransport '{}': Stopped", self.client_id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        destination: &str,
        message: ClusterMessage,
    ) -> Result<(), TransportError> {
        let command_tx = self
            .running
            .lock()
            .as_ref()
            .map(|r| r.command_tx.clone())
            .ok_or(TransportError::NotRunning)?;
        if !self.is_registered() {
            return Err(TransportError::NotConnected);
        }

        let (ack, ack_rx) = oneshot::channel();
        command_tx
            .send(Command::Publish {
                destination: destination.to_string(),
                message,
                ack,
            })
            .await
            .map_err(|_| TransportError::ConnectionLost("Command channel closed".to_string()))?;
        ack_rx
            .await
            .map_err(|_| TransportError::ConnectionLost("Connection task ended".to_string()))?
    }
}
