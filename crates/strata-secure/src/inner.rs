//! The connection protocol carried inside encrypted records.

use bytes::{Bytes, BytesMut};
use strata_core::{ConnectionId, ConnectionState, Endpoint};
use strata_proto::{ControlType, ParseResult, control};
use tracing::debug;

/// What the secure layer knows about a logical connection when sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub endpoint: Endpoint,
    pub state: ConnectionState,
    /// Token we stamp on outgoing messages.
    pub send_token: u16,
    /// Token the peer stamps on messages to us.
    pub receive_token: u16,
    pub did_receive_data: bool,
}

/// Decision of the inner protocol about a decrypted datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketCommand {
    Drop,
    ConnectionRequest {
        session_token: u16,
    },
    Reject,
    Accept {
        session_token: u16,
        connect_token: Option<u16>,
    },
    Disconnect {
        session_token: u16,
    },
    Data {
        session_token: u16,
        has_pipeline: bool,
        payload: Bytes,
    },
    Ping,
    Pong,
}

/// Receive and framing logic of the protocol wrapped by the secure layer.
pub trait InnerProtocol {
    /// Interpret decrypted plaintext from `endpoint`.
    fn process_receive(&mut self, endpoint: &Endpoint, plaintext: &[u8]) -> PacketCommand;

    /// Frame a data message for `conn` into `out`.
    fn write_data(
        &self,
        conn: &ConnectionInfo,
        has_pipeline: bool,
        payload: &[u8],
        out: &mut BytesMut,
    );

    fn write_connection_accept(&self, conn: &ConnectionInfo, out: &mut BytesMut);

    fn write_connection_request(&self, conn: &ConnectionInfo, out: &mut BytesMut);

    fn write_disconnect(&self, conn: &ConnectionInfo, out: &mut BytesMut);
}

/// The default inner protocol: `strata_proto::control` framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionProtocol;

impl InnerProtocol for ConnectionProtocol {
    fn process_receive(&mut self, endpoint: &Endpoint, plaintext: &[u8]) -> PacketCommand {
        let msg = match control::parse_control_message(plaintext) {
            ParseResult::Complete(msg) => msg,
            ParseResult::Incomplete(_) => {
                debug!(endpoint = %endpoint, len = plaintext.len(), "truncated control message");
                return PacketCommand::Drop;
            }
            ParseResult::Invalid(e) => {
                debug!(endpoint = %endpoint, error = ?e, "invalid control message");
                return PacketCommand::Drop;
            }
        };
        let session_token = msg.header.session_token;
        match msg.header.kind {
            ControlType::ConnectionRequest => PacketCommand::ConnectionRequest { session_token },
            ControlType::ConnectionReject => PacketCommand::Reject,
            ControlType::ConnectionAccept => PacketCommand::Accept {
                session_token,
                connect_token: msg.connect_token,
            },
            ControlType::Disconnect => PacketCommand::Disconnect { session_token },
            ControlType::Data => PacketCommand::Data {
                session_token,
                has_pipeline: msg.header.has_flag(control::flags::HAS_PIPELINE),
                payload: Bytes::copy_from_slice(msg.payload),
            },
            ControlType::Ping => PacketCommand::Ping,
            ControlType::Pong => PacketCommand::Pong,
        }
    }

    fn write_data(
        &self,
        conn: &ConnectionInfo,
        has_pipeline: bool,
        payload: &[u8],
        out: &mut BytesMut,
    ) {
        control::write_data(out, conn.send_token, has_pipeline, payload);
    }

    fn write_connection_accept(&self, conn: &ConnectionInfo, out: &mut BytesMut) {
        control::write_connection_accept(
            out,
            conn.send_token,
            conn.receive_token,
            conn.did_receive_data,
        );
    }

    fn write_connection_request(&self, conn: &ConnectionInfo, out: &mut BytesMut) {
        control::write_connection_request(out, conn.receive_token);
    }

    fn write_disconnect(&self, conn: &ConnectionInfo, out: &mut BytesMut) {
        control::write_disconnect(out, conn.send_token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            id: ConnectionId::NULL,
            endpoint: Endpoint::Unspecified,
            state: ConnectionState::Connected,
            send_token: 0x1234,
            receive_token: 0xBEEF,
            did_receive_data: false,
        }
    }

    #[test]
    fn data_is_decoded_with_payload() {
        let proto = ConnectionProtocol;
        let mut out = BytesMut::new();
        proto.write_data(&info(), true, b"state", &mut out);

        let cmd = ConnectionProtocol.process_receive(&Endpoint::Unspecified, &out);
        assert_eq!(
            cmd,
            PacketCommand::Data {
                session_token: 0x1234,
                has_pipeline: true,
                payload: Bytes::from_static(b"state"),
            }
        );
    }

    #[test]
    fn accept_carries_connect_token() {
        let mut out = BytesMut::new();
        ConnectionProtocol.write_connection_accept(&info(), &mut out);
        assert_eq!(
            ConnectionProtocol.process_receive(&Endpoint::Unspecified, &out),
            PacketCommand::Accept {
                session_token: 0x1234,
                connect_token: Some(0xBEEF),
            }
        );
    }

    #[test]
    fn short_or_unknown_is_dropped() {
        let mut proto = ConnectionProtocol;
        assert_eq!(
            proto.process_receive(&Endpoint::Unspecified, &[4, 0]),
            PacketCommand::Drop
        );
        assert_eq!(
            proto.process_receive(&Endpoint::Unspecified, &[99, 0, 0, 0]),
            PacketCommand::Drop
        );
    }
}
