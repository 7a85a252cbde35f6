//! Session lifecycle states shared by both ends of the protocol.

/// Where a session is in its lifecycle.
///
/// The meter drives this machine from received messages; the client holds
/// the mirror image implicitly (connect, handshake, tags, end). Only one
/// forward path exists:
///
/// ```text
/// AwaitingStart --SessionStart--> Active --SessionEnd--> Ended
/// ```
///
/// Any message that does not match the current state is a protocol
/// violation and terminates the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, no `SessionStart` seen yet.
    AwaitingStart,
    /// Session open; tags are accepted.
    Active,
    /// `SessionEnd` processed; nothing further is valid.
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingStart => "awaiting-start",
            Self::Active => "active",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}
