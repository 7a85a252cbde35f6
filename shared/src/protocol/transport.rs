//! Framed message transport over a byte stream.
//!
//! [`Connection`] owns a stream (a `TcpStream` in production, an in-memory
//! duplex in tests) and moves whole [`Message`]s across it. Framing is
//! driven by the message kind: the kind byte says exactly how much payload
//! follows, so no length envelope wraps the message itself.
//!
//! Errors split by layer: [`SetupError`] covers establishing connections
//! and [`IoError`] covers moving bytes, while [`ProtocolError`] means the
//! bytes themselves were wrong. A session that idles between messages is
//! legitimate (the peer may be computing for minutes), so the read deadline
//! is optional and off by default; callers that expect a prompt answer,
//! like a client waiting for its handshake, opt in.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::wire::{self, sizes, Message, MessageKind};
use crate::ProtocolError;

/// Default deadline for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default deadline for writing one message.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadlines applied to transport operations.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Deadline for `connect`.
    pub connect_timeout: Duration,
    /// Deadline for reading one whole message. `None` waits indefinitely;
    /// cancellation is then the caller's concern.
    pub read_timeout: Option<Duration>,
    /// Deadline for writing one whole message.
    pub write_timeout: Option<Duration>,
    /// Cap on accepted tag label length, terminator included. May be set
    /// below [`sizes::MAX_LABEL_WIRE_LEN`], never above it.
    pub max_label_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            max_label_len: sizes::MAX_LABEL_WIRE_LEN,
        }
    }
}

/// Errors establishing or accepting a connection.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: SocketAddr, after: Duration },

    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors moving bytes across an established connection.
#[derive(Debug, Error)]
pub enum IoError {
    /// Peer closed the stream mid-message.
    #[error("peer closed mid-message: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// Peer closed the stream before the message was fully written.
    #[error("peer closed mid-write: {written} of {expected} bytes written")]
    ShortWrite { expected: usize, written: usize },

    /// A configured deadline lapsed.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Union of transport-level and content-level read/write failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Resolve `host:port` to the first address the system returns.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SetupError> {
    let addr = format!("{host}:{port}");
    let mut candidates = tokio::net::lookup_host(addr.clone())
        .await
        .map_err(|source| SetupError::Resolve { addr: addr.clone(), source })?;
    candidates.next().ok_or_else(|| SetupError::Resolve {
        addr,
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "lookup returned no addresses"),
    })
}

/// A framed, deadline-aware message channel.
pub struct Connection<S = TcpStream> {
    stream: S,
    config: TransportConfig,
}

impl Connection<TcpStream> {
    /// Connect to `addr` within the configured deadline.
    pub async fn connect(addr: SocketAddr, config: TransportConfig) -> Result<Self, SetupError> {
        let after = config.connect_timeout;
        let stream = match tokio::time::timeout(after, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SetupError::Connect { addr, source }),
            Err(_) => return Err(SetupError::ConnectTimeout { addr, after }),
        };
        Ok(Self::new(stream, config))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wrap an already-established stream.
    pub fn new(stream: S, config: TransportConfig) -> Self {
        Self { stream, config }
    }

    /// Read one whole message, honoring the read deadline if one is set.
    pub async fn read_message(&mut self) -> Result<Message, TransportError> {
        let max_label = self.config.max_label_len;
        match self.config.read_timeout {
            Some(after) => {
                match tokio::time::timeout(after, read_message_inner(&mut self.stream, max_label))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(IoError::Timeout { op: "read message", after }.into()),
                }
            }
            None => read_message_inner(&mut self.stream, max_label).await,
        }
    }

    /// Encode and write `message`, honoring the write deadline if set.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        self.write_all(&bytes).await?;
        Ok(())
    }

    /// Fill `buf` exactly, honoring the read deadline if one is set.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), IoError> {
        match self.config.read_timeout {
            Some(after) => {
                match tokio::time::timeout(after, read_exact_inner(&mut self.stream, buf)).await {
                    Ok(result) => result,
                    Err(_) => Err(IoError::Timeout { op: "read", after }),
                }
            }
            None => read_exact_inner(&mut self.stream, buf).await,
        }
    }

    /// Write all of `bytes` and flush, honoring the write deadline if set.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        match self.config.write_timeout {
            Some(after) => {
                match tokio::time::timeout(after, write_all_inner(&mut self.stream, bytes)).await {
                    Ok(result) => result,
                    Err(_) => Err(IoError::Timeout { op: "write", after }),
                }
            }
            None => write_all_inner(&mut self.stream, bytes).await,
        }
    }

    /// Close the write half, signalling end-of-stream to the peer.
    pub async fn shutdown(&mut self) -> Result<(), IoError> {
        self.stream.shutdown().await.map_err(IoError::Io)
    }
}

async fn read_exact_inner<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
) -> Result<(), IoError> {
    let expected = buf.len();
    let mut got = 0;
    while got < expected {
        match stream.read(&mut buf[got..]).await {
            Ok(0) => return Err(IoError::ShortRead { expected, got }),
            Ok(n) => got += n,
            Err(source) => return Err(IoError::Io(source)),
        }
    }
    Ok(())
}

async fn write_all_inner<S: AsyncWrite + Unpin>(
    stream: &mut S,
    bytes: &[u8],
) -> Result<(), IoError> {
    let expected = bytes.len();
    let mut written = 0;
    while written < expected {
        match stream.write(&bytes[written..]).await {
            Ok(0) => return Err(IoError::ShortWrite { expected, written }),
            Ok(n) => written += n,
            Err(source) => return Err(IoError::Io(source)),
        }
    }
    stream.flush().await.map_err(IoError::Io)
}

/// Read one framed message: kind byte first, then the payload that kind
/// dictates. The tag label length is validated before its buffer exists.
async fn read_message_inner<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_label: usize,
) -> Result<Message, TransportError> {
    let mut kind_byte = [0u8; sizes::KIND_SIZE];
    read_exact_inner(stream, &mut kind_byte).await?;
    let kind = MessageKind::from_byte(kind_byte[0])
        .ok_or(ProtocolError::UnknownMessageKind(kind_byte[0]))?;

    match kind {
        MessageKind::SessionStart => {
            Ok(Message::SessionStart { timestamp: read_u64(stream).await? })
        }
        MessageKind::SessionEnd => {
            Ok(Message::SessionEnd { timestamp: read_u64(stream).await? })
        }
        MessageKind::SessionTag => {
            let declared = read_u64(stream).await?;
            let wire_len = wire::checked_label_len(declared, max_label)?;
            let mut label_bytes = vec![0u8; wire_len];
            read_exact_inner(stream, &mut label_bytes).await?;
            let label = wire::parse_label(&label_bytes)?;
            let timestamp = read_u64(stream).await?;
            Ok(Message::SessionTag { label, timestamp })
        }
        MessageKind::HandshakeOk => Ok(Message::HandshakeOk),
    }
}

async fn read_u64<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u64, IoError> {
    let mut buf = [0u8; 8];
    read_exact_inner(stream, &mut buf).await?;
    Ok(u64::from_le_bytes(buf))
}
