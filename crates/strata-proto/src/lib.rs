//! Wire framing for the strata protocol layers.
//!
//! - [`relay`]: messages exchanged with a relay server (bind, ping, connect
//!   request, forwarded data, errors).
//! - [`control`]: the inner connection protocol's small header, which is what
//!   the secure layer carries inside its encrypted records.
//!
//! Parsers never allocate and never panic on short input; writers append to a
//! caller-provided `BytesMut`.

pub mod control;
pub mod relay;

pub use control::{CONTROL_HEADER_LEN, ControlHeader, ControlMessage, ControlType};
pub use relay::{Header, MessageType, RELAY_HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Relay header signature does not match.
    InvalidSignature,
    /// Relay header version is not supported.
    InvalidVersion,
    /// Message type byte is not known.
    UnknownType(u8),
    /// A length field disagrees with the bytes on the wire.
    InvalidLength,
}

/// Errors that can occur when writing protocol data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Connection data exceeds 255 bytes.
    ConnectionDataTooLong,
    /// Payload exceeds 65535 bytes.
    PayloadTooLarge,
    /// HMAC key was rejected.
    InvalidKey,
}

/// Parse result for incremental parsing.
///
/// - `Complete(T)` - parsing succeeded, contains the parsed value.
/// - `Incomplete(n)` - buffer too small; `n` is the **minimum total bytes** needed.
/// - `Invalid(e)` - protocol violation, the packet should be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult<T> {
    Complete(T),
    Incomplete(usize),
    Invalid(ParseError),
}

impl<T> ParseResult<T> {
    /// The parsed value, discarding the failure detail.
    pub fn ok(self) -> Option<T> {
        match self {
            ParseResult::Complete(v) => Some(v),
            _ => None,
        }
    }
}

#[inline]
pub(crate) fn read_u16_le(buf: &[u8]) -> u16 {
    debug_assert!(buf.len() >= 2, "read_u16_le requires at least 2 bytes");
    u16::from_le_bytes([buf[0], buf[1]])
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use strata_core::AllocationId;

    use super::*;

    #[test]
    fn disconnect_writers_stay_per_module() {
        let mut relay_buf = BytesMut::new();
        relay::write_disconnect(&mut relay_buf, &AllocationId([1; 16]), &AllocationId([2; 16]));
        assert_eq!(relay_buf.len(), relay::DISCONNECT_LEN);
        assert_eq!(
            relay::parse_message_type(&relay_buf),
            ParseResult::Complete(MessageType::Disconnect)
        );

        let mut control_buf = BytesMut::new();
        control::write_disconnect(&mut control_buf, 7);
        assert_eq!(control_buf.len(), CONTROL_HEADER_LEN);
        assert_eq!(control_buf[0], ControlType::Disconnect as u8);
    }
}
