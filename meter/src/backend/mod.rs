//! Measurement backends
//!
//! A backend reacts to the session lifecycle: begin, tag, end, abort. The
//! session driver guarantees the call order (`begin`, zero or more `tag`s,
//! then `end` on a clean close or `abort` on any other exit) and never
//! overlaps sessions, so implementations hold per-session state in
//! `&mut self` and reset it in `end` or `abort`.

pub mod daq;
pub mod log;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::markers::Marker;

/// Failure inside a measurement backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The sample source failed to start, read, or stop.
    #[error("acquisition failure: {0}")]
    Acquisition(String),

    /// Report or log file I/O failed.
    #[error("report i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Summary serialization failed.
    #[error("summary serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An event arrived that the backend's own state cannot absorb.
    #[error("backend state error: {0}")]
    InvalidState(&'static str),
}

/// Reacts to session lifecycle events.
///
/// `tag` must be cheap: buffer and return. Anything slow (file flushes,
/// hardware teardown) belongs in `end`. Exactly one handler is bound to a
/// server and it serves one session at a time.
#[async_trait]
pub trait SessionHandler: Send {
    /// A session opened at `timestamp`. Failure here is fatal to the
    /// session: the client never gets its handshake.
    async fn begin(&mut self, timestamp: u64) -> Result<(), BackendError>;

    /// The client marked `label` at `timestamp`.
    async fn tag(&mut self, timestamp: u64, label: &str) -> Result<(), BackendError>;

    /// The session closed at `timestamp`. Stops measurement, flushes
    /// durable output, and reports what the session contained.
    async fn end(&mut self, timestamp: u64) -> Result<SessionSummary, BackendError>;

    /// The session died without a `SessionEnd`: peer disconnect, protocol
    /// violation, cancellation, or an aborting tag failure. Discards the
    /// open session and reclaims its resources so the next `begin` starts
    /// clean. Must be safe to call in any state, including after a
    /// failed `end`.
    async fn abort(&mut self);
}

/// What one completed session contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session start, client clock, nanoseconds since epoch.
    pub started_at_ns: u64,
    /// Session end, client clock.
    pub ended_at_ns: u64,
    /// `ended_at_ns - started_at_ns` (saturating).
    pub duration_ns: u64,
    /// Number of tags the client sent.
    pub tag_count: usize,
    /// Every tag with its offset from session start.
    pub tags: Vec<TagDelta>,
    /// Per-channel samples the backend read, zero for non-measuring
    /// backends.
    pub samples_read: u64,
}

/// One tag positioned relative to the session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDelta {
    pub label: String,
    /// Client clock, nanoseconds since epoch.
    pub timestamp_ns: u64,
    /// Nanoseconds after session start (saturating).
    pub offset_ns: u64,
}

impl SessionSummary {
    /// Assemble a summary from the raw pieces a backend holds at `end`.
    pub fn from_session(
        started_at_ns: u64,
        ended_at_ns: u64,
        markers: &[Marker],
        samples_read: u64,
    ) -> Self {
        let tags = markers
            .iter()
            .map(|m| TagDelta {
                label: m.label.clone(),
                timestamp_ns: m.timestamp,
                offset_ns: m.timestamp.saturating_sub(started_at_ns),
            })
            .collect::<Vec<_>>();
        Self {
            started_at_ns,
            ended_at_ns,
            duration_ns: ended_at_ns.saturating_sub(started_at_ns),
            tag_count: tags.len(),
            tags,
            samples_read,
        }
    }
}
