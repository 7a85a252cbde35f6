//! Logging backend
//!
//! Records markers and emits session events through `tracing` without
//! touching any hardware. The default backend, and the one protocol tests
//! run against.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{BackendError, SessionHandler, SessionSummary};
use crate::markers::MarkerLog;

/// Backend that only logs and summarizes.
#[derive(Debug, Default)]
pub struct LogHandler {
    markers: MarkerLog,
    started_at: Option<u64>,
}

impl LogHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionHandler for LogHandler {
    async fn begin(&mut self, timestamp: u64) -> Result<(), BackendError> {
        if self.started_at.is_some() {
            return Err(BackendError::InvalidState("begin while a session is open"));
        }
        self.started_at = Some(timestamp);
        info!(timestamp, "session opened");
        Ok(())
    }

    async fn tag(&mut self, timestamp: u64, label: &str) -> Result<(), BackendError> {
        self.markers.record(label, timestamp);
        debug!(timestamp, label, "tag recorded");
        Ok(())
    }

    async fn end(&mut self, timestamp: u64) -> Result<SessionSummary, BackendError> {
        let started_at = self
            .started_at
            .take()
            .ok_or(BackendError::InvalidState("end without begin"))?;
        let markers = self.markers.drain();
        let summary = SessionSummary::from_session(started_at, timestamp, &markers, 0);
        info!(
            duration_ns = summary.duration_ns,
            tags = summary.tag_count,
            "session closed"
        );
        Ok(summary)
    }

    async fn abort(&mut self) {
        if self.started_at.take().is_some() {
            warn!(dropped_tags = self.markers.len(), "session aborted, markers discarded");
        }
        self.markers.drain();
    }
}
