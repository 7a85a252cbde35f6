//! Session client library
//!
//! [`SessionClient`] is the workload side of the measurement protocol:
//! open a session, mark phases with tags, close the session. The
//! handshake is a hard gate; until the meter acknowledges the start, the
//! client refuses to tag, so a workload can never run "measured" phases
//! against a meter that is not recording.

pub mod config;
pub mod retry;
pub mod workload;

pub use config::ClientConfig;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use jouletrace_shared::protocol::transport::{self, IoError, SetupError};
use jouletrace_shared::utils::time::system_time_nanos;
use jouletrace_shared::{
    Connection, Message, ProtocolError, SessionState, TransportConfig, TransportError,
};

/// Client-side session failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("connection failed: {0}")]
    Io(#[from] IoError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("cannot {op} in state {state}")]
    InvalidState { op: &'static str, state: SessionState },
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(e) => ClientError::Io(e),
            TransportError::Protocol(e) => ClientError::Protocol(e),
        }
    }
}

/// One measurement session against a meter.
///
/// The protocol is linear: `start_session`, tags, `end_session`. Every
/// message carries the client clock at the moment it is issued; the meter
/// correlates readings against these timestamps, never its own arrival
/// times.
pub struct SessionClient<S = TcpStream> {
    conn: Connection<S>,
    state: SessionState,
}

impl SessionClient<TcpStream> {
    /// Connect to the meter. No session is open until `start_session`.
    pub async fn connect(
        addr: std::net::SocketAddr,
        config: TransportConfig,
    ) -> Result<Self, ClientError> {
        let conn = Connection::connect(addr, config).await?;
        Ok(Self::from_connection(conn))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> SessionClient<S> {
    /// Wrap an established connection.
    pub fn from_connection(conn: Connection<S>) -> Self {
        Self { conn, state: SessionState::AwaitingStart }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the session and wait for the meter's acknowledgement.
    ///
    /// Anything other than `HandshakeOk` fails with
    /// [`ProtocolError::HandshakeFailed`] and the client stays unusable
    /// for tags.
    pub async fn start_session(&mut self) -> Result<(), ClientError> {
        if self.state != SessionState::AwaitingStart {
            return Err(ClientError::InvalidState { op: "start session", state: self.state });
        }
        let timestamp = system_time_nanos();
        self.conn.write_message(&Message::SessionStart { timestamp }).await?;
        match self.conn.read_message().await? {
            Message::HandshakeOk => {
                self.state = SessionState::Active;
                debug!(timestamp, "session acknowledged");
                Ok(())
            }
            other => Err(ProtocolError::HandshakeFailed { got: other.kind() }.into()),
        }
    }

    /// Mark a named point in time. Fire-and-forget; the meter never
    /// replies to tags.
    pub async fn tag(&mut self, label: &str) -> Result<(), ClientError> {
        if self.state != SessionState::Active {
            return Err(ClientError::InvalidState { op: "tag", state: self.state });
        }
        let timestamp = system_time_nanos();
        self.conn
            .write_message(&Message::SessionTag { label: label.to_string(), timestamp })
            .await?;
        debug!(timestamp, label, "tag sent");
        Ok(())
    }

    /// Close the session and the connection. Consumes the client; there
    /// is nothing to say after the end message.
    pub async fn end_session(mut self) -> Result<(), ClientError> {
        if self.state != SessionState::Active {
            return Err(ClientError::InvalidState { op: "end session", state: self.state });
        }
        let timestamp = system_time_nanos();
        self.conn.write_message(&Message::SessionEnd { timestamp }).await?;
        self.conn.shutdown().await?;
        Ok(())
    }
}

/// Run one full session: connect (with retry), start, drive the demo
/// workload, end.
pub async fn run(config: ClientConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let addr = transport::resolve(&config.server_addr, config.port).await?;
    info!("Connecting to meter at {}", addr);

    let transport = config.transport();
    let mut client = retry::retry_with_backoff(
        "connect",
        config.retry_attempts,
        config.retry_delay,
        config.retry_max_delay,
        || SessionClient::connect(addr, transport),
    )
    .await?;

    client.start_session().await?;
    info!("Session open");

    workload::run_matmul_workload(&mut client, &config.workload_sizes).await?;

    client.end_session().await?;
    info!("Session ended");
    Ok(())
}
