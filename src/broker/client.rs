//! Broker side of one client connection

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{BrokerRole, Inner};
use crate::transport::protocol::{write_frame, Frame, FrameReader, PROTOCOL_VERSION};
use crate::transport::TransportError;

/// Outbound frames buffered per connection
const OUTBOUND_CAPACITY: usize = 1024;

pub(super) fn spawn(
    inner: Arc<Inner>,
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let conn_fut = run(inner.clone(), stream, addr, conn_id);
        tokio::pin!(conn_fut);

        tokio::select! {
            biased;

            result = &mut conn_fut => {
                if let Err(e) = result {
                    debug!("Broker connection {} ended: {}", addr, e);
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Broker connection {} shutting down", addr);
            }
        }
        inner.unsubscribe_all(conn_id);
    });
}

async fn run(
    inner: Arc<Inner>,
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
) -> Result<(), TransportError> {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);

    let client_id = match reader.next_frame().await? {
        Some(Frame::Hello { client_id, version }) => {
            if version != PROTOCOL_VERSION {
                write_frame(
                    &mut write_half,
                    &Frame::Rejected {
                        reason: format!("unsupported protocol version {}", version),
                    },
                )
                .await?;
                return Ok(());
            }
            client_id
        }
        Some(other) => {
            return Err(TransportError::Decode(format!(
                "expected Hello, got {}",
                other.type_name()
            )))
        }
        None => return Ok(()),
    };

    if inner.config.role == BrokerRole::Slave {
        info!("Slave broker refusing client '{}' from {}", client_id, addr);
        write_frame(
            &mut write_half,
            &Frame::Rejected {
                reason: "broker is a slave".to_string(),
            },
        )
        .await?;
        return Ok(());
    }

    write_frame(
        &mut write_half,
        &Frame::HelloAck {
            broker_id: inner.config.broker_id.clone(),
            version: PROTOCOL_VERSION,
        },
    )
    .await?;
    info!("Client '{}' connected from {}", client_id, addr);

    // A dedicated writer keeps slow sockets from blocking relays to others
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let goodbye = matches!(frame, Frame::Goodbye);
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                debug!("Broker write failed: {}", e);
                break;
            }
            if goodbye {
                break;
            }
        }
    });

    let result = loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        match frame {
            Frame::Subscribe { destination } => {
                inner.subscribe(&destination, conn_id, tx.clone());
                debug!("Client '{}' subscribed to '{}'", client_id, destination);
                if tx.send(Frame::Subscribed { destination }).await.is_err() {
                    break Ok(());
                }
            }
            Frame::Publish {
                destination,
                message,
            } => {
                inner.relay(&destination, conn_id, message).await;
            }
            Frame::Ping => {
                if tx.send(Frame::Pong).await.is_err() {
                    break Ok(());
                }
            }
            Frame::Pong => {}
            Frame::Goodbye => {
                debug!("Client '{}' said goodbye", client_id);
                break Ok(());
            }
            other => {
                warn!(
                    "Client '{}' sent unexpected {}",
                    client_id,
                    other.type_name()
                );
            }
        }
    };

    inner.unsubscribe_all(conn_id);
    drop(tx);
    let _ = writer.await;
    info!("Client '{}' disconnected", client_id);
    result
}
