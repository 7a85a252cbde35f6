//! Audit logging for session lifecycle and admin events.
//!
//! All events are emitted via `tracing` with dedicated targets so they can
//! be filtered and formatted (e.g. JSON) independently of diagnostic logs.
//! Session events reconstruct what each client did and when, which is the
//! record an operator checks a power report against.

use tracing::{info, warn};

const AUDIT_TARGET: &str = "jouletrace::audit";
const SESSION_TARGET: &str = "jouletrace::session";

/// Log a session opening after a successful handshake.
pub fn session_started(peer: &str, timestamp: u64) {
    info!(
        target: SESSION_TARGET,
        event = "session_started",
        peer = %peer,
        timestamp = %timestamp,
    );
}

/// Log a recorded tag.
pub fn tag_recorded(peer: &str, label: &str, timestamp: u64) {
    info!(
        target: SESSION_TARGET,
        event = "tag_recorded",
        peer = %peer,
        label = %label,
        timestamp = %timestamp,
    );
}

/// Log a session closing normally.
pub fn session_ended(peer: &str, duration_ns: u64, tags: usize) {
    info!(
        target: SESSION_TARGET,
        event = "session_ended",
        peer = %peer,
        duration_ns = %duration_ns,
        tags = %tags,
    );
}

/// Log a session torn down before its end message.
pub fn session_failed(peer: &str, reason: &str) {
    warn!(
        target: SESSION_TARGET,
        event = "session_failed",
        peer = %peer,
        reason = %reason,
    );
}

/// Log admin HTTP request (sensitive endpoints: metrics, readiness).
pub fn admin_http_request(path: &str, status: u16) {
    info!(
        target: AUDIT_TARGET,
        event = "admin_http_request",
        path = %path,
        status = %status,
    );
}
