//! Wire format for session messages.
//!
//! Every message starts with a one-byte kind, followed by a kind-specific
//! payload. All integers are 8-byte little-endian regardless of host, so
//! the encoding cannot drift when the meter and the workload run on
//! different architectures.
//!
//! ```text
//! SessionStart / SessionEnd:
//! +--------+----------------------+
//! | kind   | timestamp            |
//! | 1 byte | 8 bytes (LE64)       |
//! +--------+----------------------+
//!
//! SessionTag:
//! +--------+----------------+-----------------+----------------------+
//! | kind   | label length   | label bytes     | timestamp            |
//! | 1 byte | 8 bytes (LE64) | length bytes    | 8 bytes (LE64)       |
//! +--------+----------------+-----------------+----------------------+
//!
//! HandshakeOk:
//! +--------+
//! | kind   |
//! +--------+
//! ```
//!
//! The label is UTF-8 followed by a single NUL terminator; `label length`
//! counts the terminator. A declared length is validated against
//! [`sizes::MAX_LABEL_WIRE_LEN`] before any buffer is allocated for it, so
//! a corrupted or hostile peer cannot force an unbounded allocation.

use thiserror::Error;

use super::session::SessionState;

/// Size constants for the wire format.
pub mod sizes {
    /// Message kind discriminant.
    pub const KIND_SIZE: usize = 1;
    /// Timestamp field (nanoseconds, LE64).
    pub const TIMESTAMP_SIZE: usize = 8;
    /// Tag label length prefix (LE64).
    pub const LABEL_LEN_SIZE: usize = 8;
    /// Maximum on-wire label length in bytes, terminator included.
    pub const MAX_LABEL_WIRE_LEN: usize = 64 * 1024;
}

/// Message kind discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client opens a measurement session.
    SessionStart = 0,
    /// Client closes the session.
    SessionEnd = 1,
    /// Client marks a named point in time within the session.
    SessionTag = 2,
    /// Server acknowledges a successful session start (server→client only).
    HandshakeOk = 3,
}

impl MessageKind {
    /// Parse a kind from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::SessionStart),
            1 => Some(Self::SessionEnd),
            2 => Some(Self::SessionTag),
            3 => Some(Self::HandshakeOk),
            _ => None,
        }
    }

    /// Wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::SessionTag => "SessionTag",
            Self::HandshakeOk => "HandshakeOk",
        };
        f.write_str(name)
    }
}

/// A session protocol message.
///
/// Timestamps are nanoseconds since the UNIX epoch, captured on the client
/// at the moment the message is issued. Correlation always happens against
/// the client's clock, not the meter's arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Open a session.
    SessionStart {
        /// Client-side issue time in nanoseconds.
        timestamp: u64,
    },
    /// Close the session.
    SessionEnd {
        /// Client-side issue time in nanoseconds.
        timestamp: u64,
    },
    /// A named marker within the session.
    SessionTag {
        /// Marker label; UTF-8, no embedded NUL.
        label: String,
        /// Client-side issue time in nanoseconds.
        timestamp: u64,
    },
    /// Server acknowledgement of a session start.
    HandshakeOk,
}

impl Message {
    /// Kind discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SessionStart { .. } => MessageKind::SessionStart,
            Self::SessionEnd { .. } => MessageKind::SessionEnd,
            Self::SessionTag { .. } => MessageKind::SessionTag,
            Self::HandshakeOk => MessageKind::HandshakeOk,
        }
    }

    /// Timestamp carried by this message, if any.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Self::SessionStart { timestamp }
            | Self::SessionEnd { timestamp }
            | Self::SessionTag { timestamp, .. } => Some(*timestamp),
            Self::HandshakeOk => None,
        }
    }

    /// Serialize to wire bytes.
    ///
    /// Fails if a tag label contains an embedded NUL or exceeds
    /// [`sizes::MAX_LABEL_WIRE_LEN`] with its terminator.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::SessionStart { timestamp } | Self::SessionEnd { timestamp } => {
                let mut buf = Vec::with_capacity(sizes::KIND_SIZE + sizes::TIMESTAMP_SIZE);
                buf.push(self.kind().as_byte());
                buf.extend_from_slice(&timestamp.to_le_bytes());
                Ok(buf)
            }
            Self::SessionTag { label, timestamp } => {
                if label.as_bytes().contains(&0) {
                    return Err(ProtocolError::BadLabel("embedded NUL in label"));
                }
                let wire_len = label.len() + 1;
                if wire_len > sizes::MAX_LABEL_WIRE_LEN {
                    return Err(ProtocolError::OversizedLabel {
                        len: wire_len as u64,
                        max: sizes::MAX_LABEL_WIRE_LEN,
                    });
                }
                let mut buf = Vec::with_capacity(
                    sizes::KIND_SIZE + sizes::LABEL_LEN_SIZE + wire_len + sizes::TIMESTAMP_SIZE,
                );
                buf.push(self.kind().as_byte());
                buf.extend_from_slice(&(wire_len as u64).to_le_bytes());
                buf.extend_from_slice(label.as_bytes());
                buf.push(0);
                buf.extend_from_slice(&timestamp.to_le_bytes());
                Ok(buf)
            }
            Self::HandshakeOk => Ok(vec![self.kind().as_byte()]),
        }
    }

    /// Parse one message from the front of `buf`. Trailing bytes are
    /// ignored; stream framing in the transport never produces any.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let (&kind_byte, rest) = buf.split_first().ok_or(ProtocolError::Truncated {
            needed: sizes::KIND_SIZE,
            have: 0,
        })?;
        let kind = MessageKind::from_byte(kind_byte)
            .ok_or(ProtocolError::UnknownMessageKind(kind_byte))?;

        match kind {
            MessageKind::SessionStart => {
                let timestamp = take_u64(rest)?;
                Ok(Self::SessionStart { timestamp })
            }
            MessageKind::SessionEnd => {
                let timestamp = take_u64(rest)?;
                Ok(Self::SessionEnd { timestamp })
            }
            MessageKind::SessionTag => {
                let wire_len = checked_label_len(take_u64(rest)?, sizes::MAX_LABEL_WIRE_LEN)?;
                let rest = &rest[sizes::LABEL_LEN_SIZE..];
                if rest.len() < wire_len + sizes::TIMESTAMP_SIZE {
                    return Err(ProtocolError::Truncated {
                        needed: wire_len + sizes::TIMESTAMP_SIZE,
                        have: rest.len(),
                    });
                }
                let label = parse_label(&rest[..wire_len])?;
                let timestamp = take_u64(&rest[wire_len..])?;
                Ok(Self::SessionTag { label, timestamp })
            }
            MessageKind::HandshakeOk => Ok(Self::HandshakeOk),
        }
    }
}

fn take_u64(buf: &[u8]) -> Result<u64, ProtocolError> {
    if buf.len() < 8 {
        return Err(ProtocolError::Truncated { needed: 8, have: buf.len() });
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    Ok(u64::from_le_bytes(bytes))
}

/// Validate a declared label length before allocating for it.
///
/// A valid length is at least 1 (the terminator is always on the wire) and
/// at most `max`. Receivers may pass a cap tighter than
/// [`sizes::MAX_LABEL_WIRE_LEN`]; senders always encode against the wire
/// maximum.
pub fn checked_label_len(len: u64, max: usize) -> Result<usize, ProtocolError> {
    if len == 0 {
        return Err(ProtocolError::BadLabel("label length 0 leaves no room for terminator"));
    }
    if len > max as u64 {
        return Err(ProtocolError::OversizedLabel { len, max });
    }
    Ok(len as usize)
}

/// Parse on-wire label bytes (terminator included) into a `String`.
pub fn parse_label(bytes: &[u8]) -> Result<String, ProtocolError> {
    match bytes.split_last() {
        Some((0, content)) => {
            if content.contains(&0) {
                return Err(ProtocolError::BadLabel("embedded NUL in label"));
            }
            std::str::from_utf8(content)
                .map(str::to_owned)
                .map_err(|_| ProtocolError::BadLabel("label is not valid UTF-8"))
        }
        Some(_) => Err(ProtocolError::BadLabel("label missing NUL terminator")),
        None => Err(ProtocolError::BadLabel("empty label payload")),
    }
}

/// Errors in message encoding, decoding, and sequencing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Kind byte outside the defined set.
    #[error("unknown message kind: 0x{0:02x}")]
    UnknownMessageKind(u8),

    /// Message kind not valid in the session's current state.
    #[error("unexpected {kind} in state {state}")]
    UnexpectedMessage {
        /// Session state when the message arrived.
        state: SessionState,
        /// Kind of the offending message.
        kind: MessageKind,
    },

    /// Server answered the session start with something other than
    /// `HandshakeOk`.
    #[error("handshake failed: server answered with {got}")]
    HandshakeFailed {
        /// What the server sent instead.
        got: MessageKind,
    },

    /// Declared label length exceeds the allocation bound.
    #[error("label length {len} exceeds maximum {max}")]
    OversizedLabel {
        /// Declared on-wire length.
        len: u64,
        /// Configured maximum.
        max: usize,
    },

    /// Label bytes are malformed (terminator, NUL, or UTF-8 violation).
    #[error("malformed label: {0}")]
    BadLabel(&'static str),

    /// Buffer ends before the message does.
    #[error("truncated message: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required to continue parsing.
        needed: usize,
        /// Bytes available.
        have: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            MessageKind::SessionStart,
            MessageKind::SessionEnd,
            MessageKind::SessionTag,
            MessageKind::HandshakeOk,
        ] {
            assert_eq!(MessageKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(MessageKind::from_byte(4), None);
        assert_eq!(MessageKind::from_byte(7), None);
        assert_eq!(MessageKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_message_roundtrip() {
        let messages = [
            Message::SessionStart { timestamp: 0 },
            Message::SessionStart { timestamp: u64::MAX },
            Message::SessionEnd { timestamp: 2_000 },
            Message::SessionTag { label: "warmup".to_string(), timestamp: 1_100 },
            Message::SessionTag { label: String::new(), timestamp: 1 },
            Message::SessionTag { label: "phase α→β".to_string(), timestamp: 99 },
            Message::HandshakeOk,
        ];
        for msg in messages {
            let bytes = msg.encode().unwrap();
            assert_eq!(Message::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_start_wire_layout() {
        let bytes = Message::SessionStart { timestamp: 0x1122_3344_5566_7788 }
            .encode()
            .unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0);
        // Little-endian: least significant byte first.
        assert_eq!(&bytes[1..], &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_tag_wire_layout() {
        let bytes = Message::SessionTag { label: "ab".to_string(), timestamp: 7 }
            .encode()
            .unwrap();
        // kind + length + "ab\0" + timestamp
        assert_eq!(bytes.len(), 1 + 8 + 3 + 8);
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..9], &3u64.to_le_bytes());
        assert_eq!(&bytes[9..12], b"ab\0");
        assert_eq!(&bytes[12..], &7u64.to_le_bytes());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            Message::decode(&[7, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(ProtocolError::UnknownMessageKind(7))
        );
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        // Length prefix far beyond the cap; no label bytes needed to trip it.
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        match Message::decode(&bytes) {
            Err(ProtocolError::OversizedLabel { len, max }) => {
                assert_eq!(len, 1 << 40);
                assert_eq!(max, sizes::MAX_LABEL_WIRE_LEN);
            }
            other => panic!("expected OversizedLabel, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&0u64.to_le_bytes());
        assert!(matches!(Message::decode(&bytes), Err(ProtocolError::BadLabel(_))));
    }

    #[test]
    fn test_label_at_cap_roundtrips() {
        let label = "x".repeat(sizes::MAX_LABEL_WIRE_LEN - 1);
        let msg = Message::SessionTag { label, timestamp: 1 };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);

        let too_long = "x".repeat(sizes::MAX_LABEL_WIRE_LEN);
        let msg = Message::SessionTag { label: too_long, timestamp: 1 };
        assert!(matches!(msg.encode(), Err(ProtocolError::OversizedLabel { .. })));
    }

    #[test]
    fn test_embedded_nul_rejected_on_encode() {
        let msg = Message::SessionTag { label: "a\0b".to_string(), timestamp: 1 };
        assert!(matches!(msg.encode(), Err(ProtocolError::BadLabel(_))));
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(b"ab"); // no NUL
        bytes.extend_from_slice(&1u64.to_le_bytes());
        assert!(matches!(Message::decode(&bytes), Err(ProtocolError::BadLabel(_))));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&3u64.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFE, 0x00]);
        bytes.extend_from_slice(&1u64.to_le_bytes());
        assert!(matches!(Message::decode(&bytes), Err(ProtocolError::BadLabel(_))));
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = Message::SessionStart { timestamp: 1000 }.encode().unwrap();
        for cut in 0..bytes.len() {
            assert!(
                matches!(Message::decode(&bytes[..cut]), Err(ProtocolError::Truncated { .. })),
                "prefix of {} bytes should be truncated",
                cut
            );
        }
    }

    #[test]
    fn test_handshake_is_one_byte() {
        assert_eq!(Message::HandshakeOk.encode().unwrap(), vec![3]);
    }
}
