//! Time-related utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current system time in nanoseconds since UNIX epoch.
///
/// Every timestamp on the wire comes from this clock, captured on the
/// issuing side, so correlation works against one timebase per host.
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_nanos() as u64
}
