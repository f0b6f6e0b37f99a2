//! Wire Protocol
//!
//! Binary frames exchanged between members and the relay broker.
//! Frames are bincode encoded and prefixed with a big-endian `u32` length.

use bincode::{Decode, Encode};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ClusterMessage, TransportError};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u8 = 1;

/// Upper bound on a single frame
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frames of the broker protocol
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Frame {
    /// Client handshake
    Hello {
        /// Client identifier (instance name)
        client_id: String,
        /// Protocol version
        version: u8,
    },

    /// Handshake acknowledgment
    HelloAck {
        /// Broker identifier
        broker_id: String,
        /// Protocol version
        version: u8,
    },

    /// The broker refuses the client
    Rejected { reason: String },

    /// Start receiving messages published on a destination
    Subscribe { destination: String },

    /// Subscription acknowledgment
    Subscribed { destination: String },

    /// Publish a message to every other subscriber of a destination
    Publish {
        destination: String,
        message: ClusterMessage,
    },

    /// A message relayed by the broker
    Deliver {
        destination: String,
        message: ClusterMessage,
    },

    /// Keep-alive ping
    Ping,

    /// Keep-alive pong
    Pong,

    /// Graceful disconnect notification
    Goodbye,

    /// Management command (management socket only)
    Manage { command: String },

    /// Management reply
    ManageReply { value: bool, error: Option<String> },
}

impl Frame {
    /// Encode frame to bytes using bincode
    pub fn encode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    /// Decode frame from bytes using bincode
    pub fn decode(data: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        bincode::decode_from_slice(data, bincode::config::standard()).map(|(msg, _)| msg)
    }

    /// Get the frame type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "Hello",
            Frame::HelloAck { .. } => "HelloAck",
            Frame::Rejected { .. } => "Rejected",
            Frame::Subscribe { .. } => "Subscribe",
            Frame::Subscribed { .. } => "Subscribed",
            Frame::Publish { .. } => "Publish",
            Frame::Deliver { .. } => "Deliver",
            Frame::Ping => "Ping",
            Frame::Pong => "Pong",
            Frame::Goodbye => "Goodbye",
            Frame::Manage { .. } => "Manage",
            Frame::ManageReply { .. } => "ManageReply",
        }
    }
}

/// Frame a message with length prefix for TCP transmission
pub fn frame_message(frame: &Frame) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let payload = frame.encode()?;
    let len = payload.len() as u32;

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);

    Ok(out)
}

/// Read frame length from bytes (returns None if not enough data)
pub fn read_frame_length(data: &[u8]) -> Option<u32> {
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// Incremental frame reader over a byte stream
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Read the next frame; `Ok(None)` on a clean end of stream
    ///
    /// Cancel safe: a partially received frame stays buffered.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.try_parse()? {
                return Ok(Some(frame));
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::ConnectionLost(
                    "stream closed mid-frame".to_string(),
                ));
            }
        }
    }

    fn try_parse(&mut self) -> Result<Option<Frame>, TransportError> {
        let Some(len) = read_frame_length(&self.buf) else {
            return Ok(None);
        };
        let len = len as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::Decode(format!(
                "frame of {} bytes exceeds limit",
                len
            )));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        self.buf.advance(4);
        let body = self.buf.split_to(len);
        Ok(Some(Frame::decode(&body)?))
    }
}

/// Write one framed message
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), TransportError> {
    let bytes = frame_message(frame)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Parse a `tcp://host:port` broker URL into a connect address
pub fn parse_broker_url(url: &str) -> Result<String, TransportError> {
    let rest = url
        .trim()
        .strip_prefix("tcp://")
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
    // failover-style options after '?' are ignored
    let addr = rest.split('?').next().unwrap_or_default().trim_end_matches('/');
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(addr.to_string())
        }
        _ => Err(TransportError::InvalidUrl(url.to_string())),
    }
}
