//! Relay server message encoding/decoding.
//!
//! Every message starts with the same header:
//! ```text
//! +-----------+---------+------+----------------------+
//! | signature | version | type |        body          |
//! +-----------+---------+------+----------------------+
//! |  u16 LE   |   u8    |  u8  |  depends on type     |
//! +-----------+---------+------+----------------------+
//! ```
//!
//! All parse functions take the whole message, header included.

use bytes::BytesMut;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use strata_core::{ALLOCATION_ID_LEN, AllocationId};

use crate::{ParseError, ParseResult, WriteError, read_u16_le};

pub const RELAY_SIGNATURE: u16 = 0x72DA;
pub const RELAY_VERSION: u8 = 0;

/// Length of the common message header.
pub const HEADER_LEN: usize = 4;
/// Maximum length of opaque connection data.
pub const CONNECTION_DATA_MAX: usize = 255;
/// Length of the bind HMAC (SHA-256).
pub const HMAC_LEN: usize = 32;

pub const BIND_LEN: usize = HEADER_LEN + 1 + 2 + 1 + CONNECTION_DATA_MAX + HMAC_LEN; // 295
pub const PING_LEN: usize = HEADER_LEN + ALLOCATION_ID_LEN + 2; // 22
pub const CONNECT_REQUEST_LEN: usize =
    HEADER_LEN + ALLOCATION_ID_LEN + 1 + CONNECTION_DATA_MAX; // 276
pub const ACCEPTED_LEN: usize = HEADER_LEN + 2 * ALLOCATION_ID_LEN; // 36
pub const DISCONNECT_LEN: usize = HEADER_LEN + 2 * ALLOCATION_ID_LEN; // 36
/// Envelope prepended to forwarded application data.
pub const RELAY_HEADER_LEN: usize = HEADER_LEN + 2 * ALLOCATION_ID_LEN + 2; // 38
pub const ERROR_LEN: usize = HEADER_LEN + ALLOCATION_ID_LEN + 1; // 21

/// Relay message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Bind = 0,
    BindReceived = 1,
    Ping = 2,
    ConnectRequest = 3,
    Accepted = 6,
    Disconnect = 9,
    Relay = 10,
    Error = 12,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::Bind),
            1 => Some(MessageType::BindReceived),
            2 => Some(MessageType::Ping),
            3 => Some(MessageType::ConnectRequest),
            6 => Some(MessageType::Accepted),
            9 => Some(MessageType::Disconnect),
            10 => Some(MessageType::Relay),
            12 => Some(MessageType::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signature: u16,
    pub version: u8,
    pub kind: u8,
}

impl Header {
    pub fn new(kind: MessageType) -> Self {
        Self {
            signature: RELAY_SIGNATURE,
            version: RELAY_VERSION,
            kind: kind as u8,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.signature == RELAY_SIGNATURE && self.version == RELAY_VERSION
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.kind)
    }
}

/// Bind request registering (or re-registering) our allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind<'a> {
    pub accept_mode: u8,
    pub nonce: u16,
    pub connection_data: &'a [u8],
    pub hmac: [u8; HMAC_LEN],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub from: AllocationId,
    pub sequence: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest<'a> {
    pub from: AllocationId,
    pub to_connection_data: &'a [u8],
}

/// Accepted and Disconnect share the same body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPair {
    pub from: AllocationId,
    pub to: AllocationId,
}

/// Envelope around forwarded application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayEnvelope {
    pub from: AllocationId,
    pub to: AllocationId,
    pub data_len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayErrorMessage {
    pub allocation_id: AllocationId,
    pub code: u8,
}

/// Allocation timed out due to player inactivity.
pub const ERROR_PLAYER_TIMED_OUT: u8 = 1;
/// Our address changed; a rebind with a new nonce is required.
pub const ERROR_CLIENT_MISMATCH: u8 = 3;
/// The relay does not know our allocation.
pub const ERROR_ALLOCATION_NOT_FOUND: u8 = 4;

impl RelayErrorMessage {
    /// Human-readable meaning of the error code.
    pub fn description(&self) -> &'static str {
        match self.code {
            0 => "invalid protocol version",
            1 => "player timed out due to inactivity",
            2 => "unauthorized",
            3 => "allocation id client mismatch",
            4 => "allocation id not found",
            5 => "not connected",
            6 => "self-connect not allowed",
            _ => "unknown error",
        }
    }

    /// Whether the allocation can no longer be used and must be recreated.
    pub fn invalidates_allocation(&self) -> bool {
        matches!(self.code, ERROR_PLAYER_TIMED_OUT | ERROR_ALLOCATION_NOT_FOUND)
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[inline]
pub fn parse_header(buf: &[u8]) -> ParseResult<Header> {
    if buf.len() < HEADER_LEN {
        return ParseResult::Incomplete(HEADER_LEN);
    }
    ParseResult::Complete(Header {
        signature: read_u16_le(&buf[0..2]),
        version: buf[2],
        kind: buf[3],
    })
}

/// Parse and validate the header, resolving the message type.
pub fn parse_message_type(buf: &[u8]) -> ParseResult<MessageType> {
    let header = match parse_header(buf) {
        ParseResult::Complete(h) => h,
        ParseResult::Incomplete(n) => return ParseResult::Incomplete(n),
        ParseResult::Invalid(e) => return ParseResult::Invalid(e),
    };
    if header.signature != RELAY_SIGNATURE {
        return ParseResult::Invalid(ParseError::InvalidSignature);
    }
    if header.version != RELAY_VERSION {
        return ParseResult::Invalid(ParseError::InvalidVersion);
    }
    match header.message_type() {
        Some(t) => ParseResult::Complete(t),
        None => ParseResult::Invalid(ParseError::UnknownType(header.kind)),
    }
}

pub fn parse_bind(buf: &[u8]) -> ParseResult<Bind<'_>> {
    if buf.len() < BIND_LEN {
        return ParseResult::Incomplete(BIND_LEN);
    }
    let len = buf[7] as usize;
    let data_start = HEADER_LEN + 4;
    let mut hmac = [0u8; HMAC_LEN];
    hmac.copy_from_slice(&buf[BIND_LEN - HMAC_LEN..BIND_LEN]);
    ParseResult::Complete(Bind {
        accept_mode: buf[4],
        nonce: read_u16_le(&buf[5..7]),
        connection_data: &buf[data_start..data_start + len],
        hmac,
    })
}

pub fn parse_ping(buf: &[u8]) -> ParseResult<Ping> {
    if buf.len() < PING_LEN {
        return ParseResult::Incomplete(PING_LEN);
    }
    ParseResult::Complete(Ping {
        from: read_allocation_id(buf, HEADER_LEN),
        sequence: read_u16_le(&buf[20..22]),
    })
}

pub fn parse_connect_request(buf: &[u8]) -> ParseResult<ConnectRequest<'_>> {
    if buf.len() < CONNECT_REQUEST_LEN {
        return ParseResult::Incomplete(CONNECT_REQUEST_LEN);
    }
    let len = buf[20] as usize;
    ParseResult::Complete(ConnectRequest {
        from: read_allocation_id(buf, HEADER_LEN),
        to_connection_data: &buf[21..21 + len],
    })
}

/// Parse an Accepted or Disconnect body.
pub fn parse_peer_pair(buf: &[u8]) -> ParseResult<PeerPair> {
    if buf.len() < ACCEPTED_LEN {
        return ParseResult::Incomplete(ACCEPTED_LEN);
    }
    ParseResult::Complete(PeerPair {
        from: read_allocation_id(buf, HEADER_LEN),
        to: read_allocation_id(buf, HEADER_LEN + ALLOCATION_ID_LEN),
    })
}

/// Parse the envelope of a Relay message.
///
/// The declared data length is checked against the bytes that follow the
/// envelope, so a `Complete` result is safe to strip and forward.
pub fn parse_relay_envelope(buf: &[u8]) -> ParseResult<RelayEnvelope> {
    if buf.len() < RELAY_HEADER_LEN {
        return ParseResult::Incomplete(RELAY_HEADER_LEN);
    }
    let envelope = RelayEnvelope {
        from: read_allocation_id(buf, HEADER_LEN),
        to: read_allocation_id(buf, HEADER_LEN + ALLOCATION_ID_LEN),
        data_len: read_u16_le(&buf[36..38]),
    };
    if envelope.data_len as usize != buf.len() - RELAY_HEADER_LEN {
        return ParseResult::Invalid(ParseError::InvalidLength);
    }
    ParseResult::Complete(envelope)
}

pub fn parse_error(buf: &[u8]) -> ParseResult<RelayErrorMessage> {
    if buf.len() < ERROR_LEN {
        return ParseResult::Incomplete(ERROR_LEN);
    }
    ParseResult::Complete(RelayErrorMessage {
        allocation_id: read_allocation_id(buf, HEADER_LEN),
        code: buf[20],
    })
}

#[inline]
fn read_allocation_id(buf: &[u8], offset: usize) -> AllocationId {
    let mut id = [0u8; ALLOCATION_ID_LEN];
    id.copy_from_slice(&buf[offset..offset + ALLOCATION_ID_LEN]);
    AllocationId(id)
}

// ============================================================================
// Writing
// ============================================================================

#[inline]
pub fn write_header(buf: &mut BytesMut, kind: MessageType) {
    buf.extend_from_slice(&RELAY_SIGNATURE.to_le_bytes());
    buf.extend_from_slice(&[RELAY_VERSION, kind as u8]);
}

/// HMAC-SHA256 over `nonce (LE) || connection_data`, keyed by the allocation key.
pub fn compute_bind_hmac(
    key: &[u8],
    nonce: u16,
    connection_data: &[u8],
) -> Result<[u8; HMAC_LEN], WriteError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| WriteError::InvalidKey)?;
    mac.update(&nonce.to_le_bytes());
    mac.update(connection_data);
    Ok(mac.finalize().into_bytes().into())
}

/// Writes a Bind message.
///
/// # Errors
/// - `ConnectionDataTooLong` if connection data exceeds 255 bytes.
/// - `InvalidKey` if the HMAC key is rejected.
#[allow(clippy::cast_possible_truncation)]
pub fn write_bind(
    buf: &mut BytesMut,
    accept_mode: u8,
    nonce: u16,
    connection_data: &[u8],
    key: &[u8],
) -> Result<(), WriteError> {
    if connection_data.len() > CONNECTION_DATA_MAX {
        return Err(WriteError::ConnectionDataTooLong);
    }
    let hmac = compute_bind_hmac(key, nonce, connection_data)?;
    buf.reserve(BIND_LEN);
    write_header(buf, MessageType::Bind);
    buf.extend_from_slice(&[accept_mode]);
    buf.extend_from_slice(&nonce.to_le_bytes());
    buf.extend_from_slice(&[connection_data.len() as u8]);
    write_padded(buf, connection_data, CONNECTION_DATA_MAX);
    buf.extend_from_slice(&hmac);
    Ok(())
}

pub fn write_bind_received(buf: &mut BytesMut) {
    write_header(buf, MessageType::BindReceived);
}

pub fn write_ping(buf: &mut BytesMut, from: &AllocationId, sequence: u16) {
    buf.reserve(PING_LEN);
    write_header(buf, MessageType::Ping);
    buf.extend_from_slice(from.as_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
}

/// Writes a ConnectRequest message.
///
/// # Errors
/// - `ConnectionDataTooLong` if the host connection data exceeds 255 bytes.
#[allow(clippy::cast_possible_truncation)]
pub fn write_connect_request(
    buf: &mut BytesMut,
    from: &AllocationId,
    to_connection_data: &[u8],
) -> Result<(), WriteError> {
    if to_connection_data.len() > CONNECTION_DATA_MAX {
        return Err(WriteError::ConnectionDataTooLong);
    }
    buf.reserve(CONNECT_REQUEST_LEN);
    write_header(buf, MessageType::ConnectRequest);
    buf.extend_from_slice(from.as_bytes());
    buf.extend_from_slice(&[to_connection_data.len() as u8]);
    write_padded(buf, to_connection_data, CONNECTION_DATA_MAX);
    Ok(())
}

pub fn write_accepted(buf: &mut BytesMut, from: &AllocationId, to: &AllocationId) {
    write_peer_pair(buf, MessageType::Accepted, from, to);
}

pub fn write_disconnect(buf: &mut BytesMut, from: &AllocationId, to: &AllocationId) {
    write_peer_pair(buf, MessageType::Disconnect, from, to);
}

/// Writes the Relay envelope for `data_len` bytes of payload that follow.
///
/// # Errors
/// - `PayloadTooLarge` if `data_len` exceeds 65535.
#[allow(clippy::cast_possible_truncation)]
pub fn write_relay_header(
    buf: &mut BytesMut,
    from: &AllocationId,
    to: &AllocationId,
    data_len: usize,
) -> Result<(), WriteError> {
    if data_len > u16::MAX as usize {
        return Err(WriteError::PayloadTooLarge);
    }
    buf.reserve(RELAY_HEADER_LEN + data_len);
    write_header(buf, MessageType::Relay);
    buf.extend_from_slice(from.as_bytes());
    buf.extend_from_slice(to.as_bytes());
    buf.extend_from_slice(&(data_len as u16).to_le_bytes());
    Ok(())
}

pub fn write_error(buf: &mut BytesMut, allocation_id: &AllocationId, code: u8) {
    write_header(buf, MessageType::Error);
    buf.extend_from_slice(allocation_id.as_bytes());
    buf.extend_from_slice(&[code]);
}

fn write_peer_pair(buf: &mut BytesMut, kind: MessageType, from: &AllocationId, to: &AllocationId) {
    buf.reserve(ACCEPTED_LEN);
    write_header(buf, kind);
    buf.extend_from_slice(from.as_bytes());
    buf.extend_from_slice(to.as_bytes());
}

/// Copy `data` and zero-fill up to `width` bytes. Caller checks `data.len() <= width`.
fn write_padded(buf: &mut BytesMut, data: &[u8], width: usize) {
    debug_assert!(data.len() <= width);
    buf.extend_from_slice(data);
    buf.resize(buf.len() + (width - data.len()), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(b: u8) -> AllocationId {
        AllocationId([b; ALLOCATION_ID_LEN])
    }

    #[test]
    fn fixed_lengths_match_layout() {
        assert_eq!(BIND_LEN, 295);
        assert_eq!(PING_LEN, 22);
        assert_eq!(CONNECT_REQUEST_LEN, 276);
        assert_eq!(ACCEPTED_LEN, 36);
        assert_eq!(RELAY_HEADER_LEN, 38);
        assert_eq!(ERROR_LEN, 21);
    }

    #[test]
    fn header_validation() {
        let mut buf = BytesMut::new();
        write_bind_received(&mut buf);
        assert_eq!(
            parse_message_type(&buf),
            ParseResult::Complete(MessageType::BindReceived)
        );

        buf[0] = 0;
        assert_eq!(
            parse_message_type(&buf),
            ParseResult::Invalid(ParseError::InvalidSignature)
        );

        let mut buf = BytesMut::new();
        write_bind_received(&mut buf);
        buf[2] = 1;
        assert_eq!(
            parse_message_type(&buf),
            ParseResult::Invalid(ParseError::InvalidVersion)
        );

        let mut buf = BytesMut::new();
        write_bind_received(&mut buf);
        buf[3] = 42;
        assert_eq!(
            parse_message_type(&buf),
            ParseResult::Invalid(ParseError::UnknownType(42))
        );

        assert_eq!(parse_message_type(&[0xDA, 0x72]), ParseResult::Incomplete(HEADER_LEN));
    }

    #[test]
    fn bind_carries_nonce_and_fresh_hmac() {
        let key = [9u8; 64];
        let mut first = BytesMut::new();
        write_bind(&mut first, 0, 1, b"conn", &key).unwrap();
        assert_eq!(first.len(), BIND_LEN);

        let bind = parse_bind(&first).ok().unwrap();
        assert_eq!(bind.nonce, 1);
        assert_eq!(bind.connection_data, b"conn");
        assert_eq!(bind.hmac, compute_bind_hmac(&key, 1, b"conn").unwrap());

        let mut second = BytesMut::new();
        write_bind(&mut second, 0, 2, b"conn", &key).unwrap();
        assert_ne!(parse_bind(&second).ok().unwrap().hmac, bind.hmac);
    }

    #[test]
    fn connection_data_is_bounded() {
        let mut buf = BytesMut::new();
        let long = [0u8; CONNECTION_DATA_MAX + 1];
        assert_eq!(
            write_connect_request(&mut buf, &alloc(1), &long),
            Err(WriteError::ConnectionDataTooLong)
        );
        assert_eq!(
            write_bind(&mut buf, 0, 0, &long, b"k"),
            Err(WriteError::ConnectionDataTooLong)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn relay_envelope_rejects_length_mismatch() {
        let mut buf = BytesMut::new();
        write_relay_header(&mut buf, &alloc(1), &alloc(2), 5).unwrap();
        buf.extend_from_slice(b"hello");
        let envelope = parse_relay_envelope(&buf).ok().unwrap();
        assert_eq!(envelope.from, alloc(1));
        assert_eq!(envelope.to, alloc(2));
        assert_eq!(envelope.data_len, 5);

        buf.extend_from_slice(b"!");
        assert_eq!(
            parse_relay_envelope(&buf),
            ParseResult::Invalid(ParseError::InvalidLength)
        );
        assert_eq!(
            parse_relay_envelope(&buf[..10]),
            ParseResult::Incomplete(RELAY_HEADER_LEN)
        );
    }

    #[test]
    fn relay_header_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        assert_eq!(
            write_relay_header(&mut buf, &alloc(1), &alloc(2), u16::MAX as usize + 1),
            Err(WriteError::PayloadTooLarge)
        );
    }

    #[test]
    fn error_codes() {
        let mut buf = BytesMut::new();
        write_error(&mut buf, &alloc(4), ERROR_CLIENT_MISMATCH);
        let msg = parse_error(&buf).ok().unwrap();
        assert_eq!(msg.code, 3);
        assert_eq!(msg.description(), "allocation id client mismatch");
        assert!(!msg.invalidates_allocation());

        for code in [ERROR_PLAYER_TIMED_OUT, ERROR_ALLOCATION_NOT_FOUND] {
            let msg = RelayErrorMessage {
                allocation_id: alloc(0),
                code,
            };
            assert!(msg.invalidates_allocation());
        }
    }

    #[test]
    fn ping_and_peer_pair() {
        let mut buf = BytesMut::new();
        write_ping(&mut buf, &alloc(8), 513);
        assert_eq!(
            parse_ping(&buf),
            ParseResult::Complete(Ping {
                from: alloc(8),
                sequence: 513
            })
        );

        let mut buf = BytesMut::new();
        write_disconnect(&mut buf, &alloc(1), &alloc(2));
        assert_eq!(parse_message_type(&buf).ok(), Some(MessageType::Disconnect));
        let pair = parse_peer_pair(&buf).ok().unwrap();
        assert_eq!((pair.from, pair.to), (alloc(1), alloc(2)));
    }
}
