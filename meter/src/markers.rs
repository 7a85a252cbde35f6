//! In-memory marker log for one measurement session

use serde::{Deserialize, Serialize};

/// A named point in time reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    /// Client-side nanoseconds since UNIX epoch.
    pub timestamp: u64,
}

/// Ordered `(label, timestamp)` pairs accumulated over one session.
///
/// Owned by the handler driving the session; appended while the session is
/// active, drained when it ends. Markers never survive into the next
/// session.
#[derive(Debug, Default)]
pub struct MarkerLog {
    markers: Vec<Marker>,
}

impl MarkerLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a marker. Arrival order is preserved; the timestamp is the
    /// client's, not ours.
    pub fn record(&mut self, label: &str, timestamp: u64) {
        self.markers.push(Marker { label: label.to_string(), timestamp });
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Take all markers, leaving the log empty for the next session.
    pub fn drain(&mut self) -> Vec<Marker> {
        std::mem::take(&mut self.markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_preserves_order() {
        let mut log = MarkerLog::new();
        log.record("warmup", 1_100);
        log.record("phase2", 1_500);
        assert_eq!(log.len(), 2);

        let markers = log.drain();
        assert_eq!(markers[0].label, "warmup");
        assert_eq!(markers[0].timestamp, 1_100);
        assert_eq!(markers[1].label, "phase2");
        assert_eq!(markers[1].timestamp, 1_500);
    }

    #[test]
    fn test_drain_empties_the_log() {
        let mut log = MarkerLog::new();
        log.record("only", 1);

        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }
}
