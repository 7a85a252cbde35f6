//! One connection, one session.
//!
//! [`run_session`] drives the state machine for a single accepted
//! connection: exactly one `SessionStart`, any number of `SessionTag`s,
//! exactly one `SessionEnd`. Anything else, in any state, is a protocol
//! violation that ends the session. The handshake is the gate: the client
//! only hears `HandshakeOk` after the backend has actually begun
//! measuring, so a session that was never measured is never acknowledged.
//!
//! Session failures are scoped to the connection. A session that dies
//! after `begin` is aborted on the handler before the error propagates,
//! so the backend never carries a dead session into the next connection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use jouletrace_shared::protocol::transport::IoError;
use jouletrace_shared::{Connection, Message, ProtocolError, SessionState, TransportError};

use crate::audit;
use crate::backend::{BackendError, SessionHandler, SessionSummary};
use crate::config::TagFailurePolicy;
use crate::metrics;

/// Why a session ended without a clean `SessionEnd`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection failed: {0}")]
    Io(#[from] IoError),

    #[error("backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("session cancelled")]
    Cancelled,
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(e) => SessionError::Io(e),
            TransportError::Protocol(e) => SessionError::Protocol(e),
        }
    }
}

impl SessionError {
    /// Outcome label for the sessions counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            SessionError::Protocol(_) => "protocol_error",
            SessionError::Io(_) => "io_error",
            SessionError::Backend(_) => "backend_error",
            SessionError::Cancelled => "cancelled",
        }
    }
}

/// Drive one session over an established connection.
///
/// `peer` is a display string for audit events; the connection may be any
/// stream, so the caller names it. Cancellation is checked at every read,
/// which is the only place a session can park indefinitely.
pub async fn run_session<S>(
    conn: &mut Connection<S>,
    peer: &str,
    handler: &mut dyn SessionHandler,
    policy: TagFailurePolicy,
    cancel: &CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // One message decides whether a session opens at all.
    let started_at = match read_or_cancel(conn, cancel).await? {
        Message::SessionStart { timestamp } => timestamp,
        other => {
            return Err(ProtocolError::UnexpectedMessage {
                state: SessionState::AwaitingStart,
                kind: other.kind(),
            }
            .into())
        }
    };

    // The handshake is only written once the backend is measuring. A
    // failed begin closes the connection unacknowledged and the client
    // never runs its workload against a meter that is not recording.
    handler.begin(started_at).await?;

    // From here on any failure leaves the backend holding an open
    // session; it must be aborted or the next begin finds it still open.
    if let Err(e) = conn.write_message(&Message::HandshakeOk).await {
        handler.abort().await;
        return Err(e.into());
    }
    audit::session_started(peer, started_at);

    metrics::ACTIVE_SESSIONS.inc();
    let result = active_loop(conn, peer, handler, policy, cancel).await;
    metrics::ACTIVE_SESSIONS.dec();
    if result.is_err() {
        handler.abort().await;
    }
    result
}

async fn active_loop<S>(
    conn: &mut Connection<S>,
    peer: &str,
    handler: &mut dyn SessionHandler,
    policy: TagFailurePolicy,
    cancel: &CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match read_or_cancel(conn, cancel).await? {
            Message::SessionTag { label, timestamp } => {
                match handler.tag(timestamp, &label).await {
                    Ok(()) => {
                        metrics::TAGS_TOTAL.inc();
                        audit::tag_recorded(peer, &label, timestamp);
                    }
                    Err(e) => {
                        metrics::TAG_FAILURES.inc();
                        match policy {
                            TagFailurePolicy::Soft => {
                                warn!(label = %label, "tag failed, session continues: {}", e);
                            }
                            TagFailurePolicy::Abort => return Err(e.into()),
                        }
                    }
                }
            }
            Message::SessionEnd { timestamp } => {
                let summary = handler.end(timestamp).await?;
                audit::session_ended(peer, summary.duration_ns, summary.tag_count);
                metrics::SESSION_DURATION
                    .observe(summary.duration_ns as f64 / 1_000_000_000.0);
                return Ok(summary);
            }
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    state: SessionState::Active,
                    kind: other.kind(),
                }
                .into())
            }
        }
    }
}

async fn read_or_cancel<S>(
    conn: &mut Connection<S>,
    cancel: &CancellationToken,
) -> Result<Message, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = conn.read_message() => result.map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::log::LogHandler;
    use jouletrace_shared::TransportConfig;

    fn pair() -> (Connection<tokio::io::DuplexStream>, Connection<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(4096);
        (
            Connection::new(a, TransportConfig::default()),
            Connection::new(b, TransportConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_clean_session() {
        let (mut client, mut server) = pair();
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(async move {
            let mut handler = LogHandler::new();
            run_session(&mut server, "test", &mut handler, TagFailurePolicy::Soft, &cancel).await
        });

        client.write_message(&Message::SessionStart { timestamp: 1_000 }).await.unwrap();
        assert_eq!(client.read_message().await.unwrap(), Message::HandshakeOk);
        client
            .write_message(&Message::SessionTag { label: "warmup".to_string(), timestamp: 1_100 })
            .await
            .unwrap();
        client.write_message(&Message::SessionEnd { timestamp: 2_000 }).await.unwrap();

        let summary = driver.await.unwrap().unwrap();
        assert_eq!(summary.started_at_ns, 1_000);
        assert_eq!(summary.tag_count, 1);
        assert_eq!(summary.duration_ns, 1_000);
    }

    #[tokio::test]
    async fn test_tag_before_start_is_unexpected() {
        let (mut client, mut server) = pair();
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(async move {
            let mut handler = LogHandler::new();
            run_session(&mut server, "test", &mut handler, TagFailurePolicy::Soft, &cancel).await
        });

        client
            .write_message(&Message::SessionTag { label: "early".to_string(), timestamp: 1 })
            .await
            .unwrap();

        match driver.await.unwrap() {
            Err(SessionError::Protocol(ProtocolError::UnexpectedMessage { state, kind })) => {
                assert_eq!(state, SessionState::AwaitingStart);
                assert_eq!(kind, jouletrace_shared::MessageKind::SessionTag);
            }
            other => panic!("expected UnexpectedMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_start_is_unexpected() {
        let (mut client, mut server) = pair();
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(async move {
            let mut handler = LogHandler::new();
            run_session(&mut server, "test", &mut handler, TagFailurePolicy::Soft, &cancel).await
        });

        client.write_message(&Message::SessionStart { timestamp: 1_000 }).await.unwrap();
        assert_eq!(client.read_message().await.unwrap(), Message::HandshakeOk);
        client.write_message(&Message::SessionStart { timestamp: 1_001 }).await.unwrap();

        match driver.await.unwrap() {
            Err(SessionError::Protocol(ProtocolError::UnexpectedMessage { state, .. })) => {
                assert_eq!(state, SessionState::Active);
            }
            other => panic!("expected UnexpectedMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_survives_mid_session_disconnect() {
        let (mut first_client, mut first_server) = pair();
        let (mut second_client, mut second_server) = pair();
        let cancel = CancellationToken::new();

        // One handler, two sessions in a row, the first dying mid-stream.
        let driver = tokio::spawn(async move {
            let mut handler = LogHandler::new();
            let first = run_session(
                &mut first_server,
                "one",
                &mut handler,
                TagFailurePolicy::Soft,
                &cancel,
            )
            .await;
            let second = run_session(
                &mut second_server,
                "two",
                &mut handler,
                TagFailurePolicy::Soft,
                &cancel,
            )
            .await;
            (first, second)
        });

        first_client.write_message(&Message::SessionStart { timestamp: 1_000 }).await.unwrap();
        assert_eq!(first_client.read_message().await.unwrap(), Message::HandshakeOk);
        first_client
            .write_message(&Message::SessionTag { label: "doomed".to_string(), timestamp: 1_100 })
            .await
            .unwrap();
        drop(first_client);

        second_client.write_message(&Message::SessionStart { timestamp: 5_000 }).await.unwrap();
        assert_eq!(second_client.read_message().await.unwrap(), Message::HandshakeOk);
        second_client.write_message(&Message::SessionEnd { timestamp: 6_000 }).await.unwrap();

        let (first, second) = driver.await.unwrap();
        assert!(matches!(first, Err(SessionError::Io(IoError::ShortRead { .. }))));

        // The aborted session left nothing behind; its tag is gone.
        let summary = second.unwrap();
        assert_eq!(summary.started_at_ns, 5_000);
        assert_eq!(summary.tag_count, 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_idle_read() {
        let (client, mut server) = pair();
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let driver = tokio::spawn(async move {
            let mut handler = LogHandler::new();
            run_session(&mut server, "test", &mut handler, TagFailurePolicy::Soft, &child).await
        });

        // Session never starts; the read must still be interruptible.
        cancel.cancel();
        match driver.await.unwrap() {
            Err(SessionError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }
        drop(client);
    }
}
