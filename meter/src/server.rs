//! Accept loop and session driver.
//!
//! The meter serves one session at a time: accept, run the session to
//! completion, account for the outcome, accept again. A failed session
//! costs its own connection and nothing else; the listener stays up and
//! the handler is handed the next session.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jouletrace_shared::protocol::transport::SetupError;
use jouletrace_shared::{Connection, TransportConfig};

use crate::audit;
use crate::backend::{SessionHandler, SessionSummary};
use crate::config::TagFailurePolicy;
use crate::metrics;
use crate::session::{run_session, SessionError};

/// Failure of a single-shot serve: either the listener broke or the one
/// session did.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Sequential session server.
pub struct MeterServer {
    listener: TcpListener,
    transport: TransportConfig,
    policy: TagFailurePolicy,
}

impl MeterServer {
    /// Bind the session listener.
    pub async fn bind(
        addr: SocketAddr,
        transport: TransportConfig,
        policy: TagFailurePolicy,
    ) -> Result<Self, SetupError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SetupError::Bind { addr, source })?;
        Ok(Self { listener, transport, policy })
    }

    /// Actual bound address; differs from the requested one for port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve sessions until cancelled.
    ///
    /// Session failures are logged and counted here; only listener
    /// failures propagate.
    pub async fn serve(
        &mut self,
        handler: &mut dyn SessionHandler,
        cancel: &CancellationToken,
    ) -> Result<(), SetupError> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("accept loop stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted.map_err(SetupError::Accept)?,
            };

            let peer = peer.to_string();
            info!(peer = %peer, "connection accepted");
            let mut conn = Connection::new(stream, self.transport);

            match run_session(&mut conn, &peer, handler, self.policy, cancel).await {
                Ok(summary) => {
                    metrics::SESSIONS_TOTAL.with_label_values(&["ok"]).inc();
                    info!(
                        peer = %peer,
                        duration_ns = summary.duration_ns,
                        tags = summary.tag_count,
                        "session completed"
                    );
                }
                Err(SessionError::Cancelled) => {
                    metrics::SESSIONS_TOTAL.with_label_values(&["cancelled"]).inc();
                    audit::session_failed(&peer, "cancelled");
                    return Ok(());
                }
                Err(e) => {
                    if matches!(e, SessionError::Protocol(_)) {
                        metrics::PROTOCOL_ERRORS.inc();
                    }
                    metrics::SESSIONS_TOTAL.with_label_values(&[e.outcome()]).inc();
                    audit::session_failed(&peer, &e.to_string());
                    warn!(peer = %peer, "session failed: {}", e);
                }
            }
        }
    }

    /// Accept one connection, run one session, return its result.
    pub async fn serve_once(
        &mut self,
        handler: &mut dyn SessionHandler,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary, ServeError> {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled.into()),
            accepted = self.listener.accept() => accepted.map_err(SetupError::Accept)?,
        };

        let peer = peer.to_string();
        info!(peer = %peer, "connection accepted");
        let mut conn = Connection::new(stream, self.transport);

        let result = run_session(&mut conn, &peer, handler, self.policy, cancel).await;
        match &result {
            Ok(_) => metrics::SESSIONS_TOTAL.with_label_values(&["ok"]).inc(),
            Err(e) => {
                if matches!(e, SessionError::Protocol(_)) {
                    metrics::PROTOCOL_ERRORS.inc();
                }
                metrics::SESSIONS_TOTAL.with_label_values(&[e.outcome()]).inc();
                audit::session_failed(&peer, &e.to_string());
            }
        }
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::log::LogHandler;
    use jouletrace_shared::Message;

    #[tokio::test]
    async fn test_serve_once_happy_path() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server =
            MeterServer::bind(addr, TransportConfig::default(), TagFailurePolicy::Soft)
                .await
                .unwrap();
        let bound = server.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(async move {
            let mut handler = LogHandler::new();
            server.serve_once(&mut handler, &cancel).await
        });

        let mut client =
            Connection::connect(bound, TransportConfig::default()).await.unwrap();
        client.write_message(&Message::SessionStart { timestamp: 10 }).await.unwrap();
        assert_eq!(client.read_message().await.unwrap(), Message::HandshakeOk);
        client.write_message(&Message::SessionEnd { timestamp: 30 }).await.unwrap();

        let summary = driver.await.unwrap().unwrap();
        assert_eq!(summary.duration_ns, 20);
    }

    #[tokio::test]
    async fn test_bind_rejects_used_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let first = MeterServer::bind(addr, TransportConfig::default(), TagFailurePolicy::Soft)
            .await
            .unwrap();
        let taken = first.local_addr().unwrap();

        match MeterServer::bind(taken, TransportConfig::default(), TagFailurePolicy::Soft).await {
            Err(SetupError::Bind { addr, .. }) => assert_eq!(addr, taken),
            other => panic!("expected Bind error, got {:?}", other.map(|_| ())),
        }
    }
}
