//! Management socket
//!
//! Exposes a [`BrokerService`] to operators over the same length-prefixed
//! frame format the broker speaks: a client sends `Manage { command }` and
//! receives `ManageReply { value, error }`.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{BrokerError, BrokerService};
use crate::transport::protocol::{write_frame, Frame, FrameReader};

/// Operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementCommand {
    IsStarted,
    IsSlave,
    Start,
    Stop,
    AsyncStart,
    AsyncStop,
}

impl ManagementCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagementCommand::IsStarted => "isStarted",
            ManagementCommand::IsSlave => "isSlave",
            ManagementCommand::Start => "start",
            ManagementCommand::Stop => "stop",
            ManagementCommand::AsyncStart => "asyncStart",
            ManagementCommand::AsyncStop => "asyncStop",
        }
    }

    /// Run the command against a service
    pub async fn execute(&self, service: &dyn BrokerService) -> Result<bool, BrokerError> {
        match self {
            ManagementCommand::IsStarted => Ok(service.is_started()),
            ManagementCommand::IsSlave => Ok(service.is_slave()),
            ManagementCommand::Start => service.start().await.map(|_| true),
            ManagementCommand::Stop => service.stop().await.map(|_| true),
            ManagementCommand::AsyncStart => {
                service.async_start();
                Ok(true)
            }
            ManagementCommand::AsyncStop => {
                service.async_stop();
                Ok(true)
            }
        }
    }
}

impl FromStr for ManagementCommand {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s.to_ascii_lowercase().as_str() {
            "isstarted" => ManagementCommand::IsStarted,
            "isslave" => ManagementCommand::IsSlave,
            "start" => ManagementCommand::Start,
            "stop" => ManagementCommand::Stop,
            "asyncstart" => ManagementCommand::AsyncStart,
            "asyncstop" => ManagementCommand::AsyncStop,
            _ => return Err(BrokerError::Invalid(format!("command '{}'", s))),
        };
        Ok(command)
    }
}

impl fmt::Display for ManagementCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serves management commands for one service
pub struct ManagementServer {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ManagementServer {
    /// Bind and start serving
    pub async fn bind(
        addr: SocketAddr,
        service: Arc<dyn BrokerService>,
    ) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        let mut shutdown_rx = shutdown.subscribe();
        info!("Management interface listening on {}", local_addr);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let service = service.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve(stream, service).await {
                                    debug!("Management session {} ended: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept management connection: {}", e),
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting management connections
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

async fn serve(stream: TcpStream, service: Arc<dyn BrokerService>) -> Result<(), BrokerError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);

    while let Some(frame) = reader.next_frame().await? {
        let reply = match frame {
            Frame::Manage { command } => match command.parse::<ManagementCommand>() {
                Ok(command) => {
                    debug!("Management command {}", command);
                    match command.execute(service.as_ref()).await {
                        Ok(value) => Frame::ManageReply { value, error: None },
                        Err(e) => Frame::ManageReply {
                            value: false,
                            error: Some(e.to_string()),
                        },
                    }
                }
                Err(e) => Frame::ManageReply {
                    value: false,
                    error: Some(e.to_string()),
                },
            },
            Frame::Goodbye => break,
            other => Frame::ManageReply {
                value: false,
                error: Some(format!("unexpected {}", other.type_name())),
            },
        };
        write_frame(&mut write_half, &reply).await?;
    }
    Ok(())
}

/// Client of a [`ManagementServer`]
pub struct ManagementClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl ManagementClient {
    /// Connect to a management address (`host:port`)
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BrokerError::Management(format!("timed out connecting to {}", addr)))??;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half),
            writer,
            timeout,
        })
    }

    /// Run a command and return its boolean result
    pub async fn call(&mut self, command: ManagementCommand) -> Result<bool, BrokerError> {
        write_frame(
            &mut self.writer,
            &Frame::Manage {
                command: command.as_str().to_string(),
            },
        )
        .await?;

        let reply = tokio::time::timeout(self.timeout, self.reader.next_frame())
            .await
            .map_err(|_| BrokerError::Management(format!("no reply to {}", command)))??;
        match reply {
            Some(Frame::ManageReply { value, error: None }) => Ok(value),
            Some(Frame::ManageReply {
                error: Some(error), ..
            }) => Err(BrokerError::Management(error)),
            Some(other) => Err(BrokerError::Management(format!(
                "unexpected {}",
                other.type_name()
            ))),
            None => Err(BrokerError::Management("connection closed".to_string())),
        }
    }

    /// Say goodbye and close the connection
    pub async fn close(mut self) {
        let _ = write_frame(&mut self.writer, &Frame::Goodbye).await;
    }
}
