//! Inner connection protocol framing.
//!
//! ```text
//! +------+-------+---------------+-------------------------------+
//! | type | flags | session_token | connect_token? | payload ...  |
//! +------+-------+---------------+-------------------------------+
//! |  u8  |  u8   |    u16 LE     |    u16 LE      |              |
//! +------+-------+---------------+-------------------------------+
//! ```

use bytes::BytesMut;

use crate::{ParseError, ParseResult, read_u16_le};

pub const CONTROL_HEADER_LEN: usize = 4;

/// Control message flags.
pub mod flags {
    /// A u16 connect token follows the header.
    pub const HAS_CONNECT_TOKEN: u8 = 0x1;
    /// A pipeline id is carried in the payload.
    pub const HAS_PIPELINE: u8 = 0x2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlType {
    ConnectionRequest = 0,
    ConnectionReject = 1,
    ConnectionAccept = 2,
    Disconnect = 3,
    Data = 4,
    Ping = 5,
    Pong = 6,
}

impl ControlType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ControlType::ConnectionRequest),
            1 => Some(ControlType::ConnectionReject),
            2 => Some(ControlType::ConnectionAccept),
            3 => Some(ControlType::Disconnect),
            4 => Some(ControlType::Data),
            5 => Some(ControlType::Ping),
            6 => Some(ControlType::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub kind: ControlType,
    pub flags: u8,
    pub session_token: u16,
}

impl ControlHeader {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A decoded control message borrowing its payload from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage<'a> {
    pub header: ControlHeader,
    pub connect_token: Option<u16>,
    pub payload: &'a [u8],
}

#[inline]
pub fn parse_control_header(buf: &[u8]) -> ParseResult<ControlHeader> {
    if buf.len() < CONTROL_HEADER_LEN {
        return ParseResult::Incomplete(CONTROL_HEADER_LEN);
    }
    let Some(kind) = ControlType::from_u8(buf[0]) else {
        return ParseResult::Invalid(ParseError::UnknownType(buf[0]));
    };
    ParseResult::Complete(ControlHeader {
        kind,
        flags: buf[1],
        session_token: read_u16_le(&buf[2..4]),
    })
}

pub fn parse_control_message(buf: &[u8]) -> ParseResult<ControlMessage<'_>> {
    let header = match parse_control_header(buf) {
        ParseResult::Complete(h) => h,
        ParseResult::Incomplete(n) => return ParseResult::Incomplete(n),
        ParseResult::Invalid(e) => return ParseResult::Invalid(e),
    };

    let mut cursor = CONTROL_HEADER_LEN;
    let connect_token = if header.has_flag(flags::HAS_CONNECT_TOKEN) {
        if buf.len() < cursor + 2 {
            return ParseResult::Incomplete(cursor + 2);
        }
        let token = read_u16_le(&buf[cursor..cursor + 2]);
        cursor += 2;
        Some(token)
    } else {
        None
    };

    ParseResult::Complete(ControlMessage {
        header,
        connect_token,
        payload: &buf[cursor..],
    })
}

#[inline]
fn write_control_header(buf: &mut BytesMut, kind: ControlType, flags: u8, session_token: u16) {
    buf.extend_from_slice(&[kind as u8, flags]);
    buf.extend_from_slice(&session_token.to_le_bytes());
}

/// ConnectionAccept; the receive token is appended until the peer has sent data.
pub fn write_connection_accept(
    buf: &mut BytesMut,
    send_token: u16,
    receive_token: u16,
    did_receive_data: bool,
) {
    if did_receive_data {
        write_control_header(buf, ControlType::ConnectionAccept, 0, send_token);
    } else {
        write_control_header(
            buf,
            ControlType::ConnectionAccept,
            flags::HAS_CONNECT_TOKEN,
            send_token,
        );
        buf.extend_from_slice(&receive_token.to_le_bytes());
    }
}

pub fn write_connection_request(buf: &mut BytesMut, receive_token: u16) {
    write_control_header(buf, ControlType::ConnectionRequest, 0, receive_token);
}

pub fn write_disconnect(buf: &mut BytesMut, send_token: u16) {
    write_control_header(buf, ControlType::Disconnect, 0, send_token);
}

pub fn write_data(buf: &mut BytesMut, send_token: u16, has_pipeline: bool, payload: &[u8]) {
    let flags = if has_pipeline { flags::HAS_PIPELINE } else { 0 };
    buf.reserve(CONTROL_HEADER_LEN + payload.len());
    write_control_header(buf, ControlType::Data, flags, send_token);
    buf.extend_from_slice(payload);
}
