//! Relay layer: tunnels peer connections through one relay server connection.
//!
//! Each tick the owner calls [`RelayLayer::receive`] and then
//! [`RelayLayer::send`]. Receive consumes relay messages, updates the relay
//! session and peer connections, and stages control messages in the deferred
//! queue. Send wraps application packets in Relay envelopes and flushes the
//! deferred queue.

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use strata_config::{NetworkConfig, RelayConfig};
use strata_core::{
    AllocationId, ConnectionId, ConnectionList, ConnectionState, DEFERRED_SEND_QUEUE_CAPACITY,
    DisconnectReason, Endpoint, Packet, PacketsQueue,
};
use strata_metrics::{
    LAYER_RELAY, record_packet_dropped, record_relay_control_sent, record_relay_error,
};
use strata_proto::relay::{self as wire, MessageType, RELAY_HEADER_LEN};
use strata_proto::{ParseResult, WriteError};
use tracing::{debug, error, info, warn};

use crate::endpoints::EndpointIndex;
use crate::error::RelayError;
use crate::state::{
    ConnectionRetry, ProtocolData, RelayConnectionStatus, RelayServerData, UnderlyingConnections,
};

pub struct RelayLayer {
    /// Peer connections; their endpoints are allocation ids.
    connections: ConnectionList,
    protocol: ProtocolData,
    retries: HashMap<ConnectionId, ConnectionRetry>,
    endpoints: EndpointIndex,
    deferred: PacketsQueue,
}

impl RelayLayer {
    /// Build the layer from configuration.
    ///
    /// Adds the relay envelope size to `packet_padding` so lower layers leave
    /// room for it.
    pub fn new(
        network: &NetworkConfig,
        relay: &RelayConfig,
        packet_padding: &mut usize,
    ) -> Result<Self, RelayError> {
        let protocol = ProtocolData::new(network.connect_timeout_ms, relay)?;
        info!(
            relay = %protocol.server.endpoint,
            allocation_id = %protocol.server.allocation_id,
            "relay layer initialized"
        );
        *packet_padding += RELAY_HEADER_LEN;
        Ok(Self {
            connections: ConnectionList::new(),
            protocol,
            retries: HashMap::new(),
            endpoints: EndpointIndex::new(),
            deferred: PacketsQueue::with_capacity(DEFERRED_SEND_QUEUE_CAPACITY),
        })
    }

    pub fn connections(&self) -> &ConnectionList {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionList {
        &mut self.connections
    }

    /// Start connecting to the relay host. Only one outbound connection is allowed.
    pub fn connect(&mut self) -> ConnectionId {
        self.connections.start_connecting(Endpoint::Unspecified)
    }

    /// Request a graceful disconnect, completed on the next receive pass.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        self.connections.start_disconnecting(connection)
    }

    pub fn connection_status(&self) -> RelayConnectionStatus {
        self.protocol.status
    }

    pub fn nonce(&self) -> u16 {
        self.protocol.server.nonce
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Handle of the physical relay server connection.
    pub fn underlying_connection(&self) -> ConnectionId {
        self.protocol.underlying
    }

    /// Install a freshly allocated relay descriptor and bind again.
    pub fn reset_allocation(&mut self, server: RelayServerData) {
        info!(
            previous = %self.protocol.status,
            allocation_id = %server.allocation_id,
            "relay allocation reset"
        );
        self.protocol.server = server;
        self.protocol.status = RelayConnectionStatus::NotEstablished;
        self.protocol.last_sent = 0;
        self.protocol.rebind_pending = false;
        self.endpoints.clear();
    }

    // ========================================================================
    // Receive
    // ========================================================================

    pub fn receive<U: UnderlyingConnections>(
        &mut self,
        queue: &mut PacketsQueue,
        underlying: &mut U,
        now: i64,
    ) {
        for packet in queue.iter_mut() {
            if !packet.is_discarded() {
                self.process_message(packet);
            }
        }
        self.process_relay_server_connection(underlying, now);
        self.process_connection_states(now);
    }

    fn process_message(&mut self, packet: &mut Packet) {
        let kind = match wire::parse_message_type(&packet.payload) {
            ParseResult::Complete(kind) => kind,
            ParseResult::Incomplete(_) => {
                drop_packet(packet, "truncated");
                return;
            }
            ParseResult::Invalid(e) => {
                debug!(error = ?e, "invalid relay header");
                drop_packet(packet, "invalid_header");
                return;
            }
        };

        match kind {
            MessageType::BindReceived => {
                if self.protocol.status != RelayConnectionStatus::Established {
                    info!(relay = %self.protocol.server.endpoint, "relay bind acknowledged");
                }
                self.protocol.status = RelayConnectionStatus::Established;
                packet.discard();
            }
            MessageType::Accepted => {
                self.handle_accepted(&packet.payload);
                packet.discard();
            }
            MessageType::Disconnect => {
                self.handle_disconnect(&packet.payload);
                packet.discard();
            }
            MessageType::Relay => self.handle_relay(packet),
            MessageType::Error => {
                self.handle_error(&packet.payload);
                packet.discard();
            }
            _ => drop_packet(packet, "unexpected_type"),
        }
    }

    fn handle_accepted(&mut self, payload: &[u8]) {
        let Some(accepted) = wire::parse_peer_pair(payload).ok() else {
            record_packet_dropped(LAYER_RELAY, "truncated");
            return;
        };

        // Only the single outbound connection to the host can be accepted.
        if self.connections.count() != 1 {
            error!(
                count = self.connections.count(),
                "relay accepted received but exactly one connection is expected"
            );
            return;
        }
        let Some(id) = self.connections.connection_at(0) else {
            return;
        };
        if self.connections.state(id) != ConnectionState::Connecting {
            return;
        }

        let host = accepted.from.to_endpoint();
        self.connections.finish_connecting_from_local(id);
        self.connections.update_endpoint(id, host);
        self.endpoints.insert(host, id);
        info!(host = %accepted.from, connection = %id, "relay connection accepted");
    }

    fn handle_disconnect(&mut self, payload: &[u8]) {
        let Some(msg) = wire::parse_peer_pair(payload).ok() else {
            record_packet_dropped(LAYER_RELAY, "truncated");
            return;
        };
        if msg.to != self.protocol.server.allocation_id {
            debug!(to = %msg.to, "relay disconnect for another allocation");
            return;
        }

        let endpoint = msg.from.to_endpoint();
        if let Some(id) = self.endpoints.remove_endpoint(&endpoint) {
            self.connections.start_disconnecting(id);
            self.connections
                .finish_disconnecting(id, DisconnectReason::ClosedByRemote);
            self.retries.remove(&id);
            debug!(peer = %msg.from, connection = %id, "peer disconnected through relay");
        }
    }

    fn handle_relay(&mut self, packet: &mut Packet) {
        let envelope = match wire::parse_relay_envelope(&packet.payload) {
            ParseResult::Complete(envelope) => envelope,
            ParseResult::Incomplete(_) => {
                drop_packet(packet, "truncated");
                return;
            }
            ParseResult::Invalid(_) => {
                drop_packet(packet, "length_mismatch");
                return;
            }
        };
        if envelope.to != self.protocol.server.allocation_id {
            drop_packet(packet, "wrong_destination");
            return;
        }

        let endpoint = envelope.from.to_endpoint();
        let id = match self.endpoints.get(&endpoint) {
            Some(id) => id,
            None => {
                // The relay never announces inbound peers; the first datagram does.
                let id = self.connections.start_connecting(endpoint);
                self.connections.finish_connecting_from_remote(id);
                self.endpoints.insert(endpoint, id);
                info!(peer = %envelope.from, connection = %id, "new peer through relay");
                id
            }
        };

        packet.payload.advance(RELAY_HEADER_LEN);
        packet.endpoint = endpoint;
        packet.connection = id;
    }

    fn handle_error(&mut self, payload: &[u8]) {
        let Some(msg) = wire::parse_error(payload).ok() else {
            record_packet_dropped(LAYER_RELAY, "truncated");
            return;
        };
        error!(
            code = msg.code,
            allocation_id = %msg.allocation_id,
            "relay error: {}",
            msg.description()
        );
        record_relay_error(msg.code);

        if msg.code == wire::ERROR_CLIENT_MISMATCH {
            // Our address changed: bind again with a fresh nonce until the
            // relay acknowledges.
            self.protocol.server.nonce = self.protocol.server.nonce.wrapping_add(1);
            self.protocol.status = RelayConnectionStatus::NotEstablished;
            self.protocol.rebind_pending = true;
        } else if msg.invalidates_allocation() {
            warn!(allocation_id = %msg.allocation_id, "relay allocation is no longer valid");
            self.protocol.status = RelayConnectionStatus::AllocationInvalid;
        }
    }

    fn process_relay_server_connection<U: UnderlyingConnections>(
        &mut self,
        underlying: &mut U,
        now: i64,
    ) {
        match self.protocol.status {
            RelayConnectionStatus::NotEstablished => {
                let endpoint = self.protocol.server.endpoint;
                if !underlying.try_connect(&endpoint, &mut self.protocol.underlying) {
                    return;
                }
                let since = now - self.protocol.last_sent;
                if self.protocol.rebind_pending
                    || since > self.protocol.connect_timeout
                    || self.protocol.last_sent == 0
                {
                    let server = &self.protocol.server;
                    debug!(nonce = server.nonce, relay = %server.endpoint, "sending relay bind");
                    let queued = enqueue_control(&mut self.deferred, &self.protocol, "bind", |buf| {
                        wire::write_bind(
                            buf,
                            server.accept_mode,
                            server.nonce,
                            &server.connection_data,
                            &server.key,
                        )
                    });
                    if queued {
                        self.protocol.last_sent = now;
                        self.protocol.rebind_pending = false;
                    }
                }
            }
            RelayConnectionStatus::Established => {
                if now - self.protocol.last_sent >= self.protocol.heartbeat {
                    let sequence = self.protocol.next_ping_sequence();
                    let from = self.protocol.server.allocation_id;
                    enqueue_control(&mut self.deferred, &self.protocol, "ping", |buf| {
                        wire::write_ping(buf, &from, sequence);
                        Ok(())
                    });
                }
            }
            RelayConnectionStatus::AllocationInvalid => {}
        }
    }

    fn process_connection_states(&mut self, now: i64) {
        for id in self.connections.ids() {
            match self.connections.state(id) {
                ConnectionState::Disconnecting => self.process_disconnecting(id),
                ConnectionState::Connecting => self.process_connecting(id, now),
                _ => {}
            }
        }
    }

    fn process_disconnecting(&mut self, id: ConnectionId) {
        let peer = self
            .connections
            .endpoint(id)
            .and_then(|ep| ep.as_allocation_id());

        if self.protocol.status == RelayConnectionStatus::Established
            && let Some(peer) = peer
        {
            let from = self.protocol.server.allocation_id;
            let queued = enqueue_control(&mut self.deferred, &self.protocol, "disconnect", |buf| {
                wire::write_disconnect(buf, &from, &peer);
                Ok(())
            });
            if !queued {
                // Stay Disconnecting; the peer is told on a later pass.
                return;
            }
        }

        self.connections
            .finish_disconnecting(id, DisconnectReason::Default);
        self.retries.remove(&id);
        self.endpoints.remove_connection(id);
        debug!(connection = %id, "relay connection closed locally");
    }

    fn process_connecting(&mut self, id: ConnectionId, now: i64) {
        if self.connections.count() > 1 {
            error!(connection = %id, "only one outbound connection is allowed through the relay");
            self.connections.start_disconnecting(id);
            self.connections
                .finish_disconnecting(id, DisconnectReason::Rejected);
            self.retries.remove(&id);
            return;
        }

        let retry = self.retries.entry(id).or_default();
        if now - retry.last_connect_attempt < self.protocol.connect_timeout {
            return;
        }
        retry.last_connect_attempt = now;

        let from = self.protocol.server.allocation_id;
        let host_data = &self.protocol.server.host_connection_data;
        debug!(connection = %id, "sending relay connect request");
        enqueue_control(&mut self.deferred, &self.protocol, "connect_request", |buf| {
            wire::write_connect_request(buf, &from, host_data)
        });
    }

    // ========================================================================
    // Send
    // ========================================================================

    pub fn send(&mut self, queue: &mut PacketsQueue, now: i64) {
        let from = self.protocol.server.allocation_id;
        let mut actual_send = !self.deferred.is_empty();

        for packet in queue.iter_mut() {
            if packet.is_empty() || packet.is_discarded() {
                continue;
            }
            let Some(to) = self.peer_allocation(packet.connection) else {
                debug!(connection = %packet.connection, "no relay endpoint for outbound packet");
                drop_packet(packet, "no_endpoint");
                continue;
            };

            let mut framed = BytesMut::with_capacity(RELAY_HEADER_LEN + packet.len());
            if let Err(e) = wire::write_relay_header(&mut framed, &from, &to, packet.len()) {
                debug!(error = ?e, len = packet.len(), "outbound packet cannot be relayed");
                drop_packet(packet, "oversized");
                continue;
            }
            framed.extend_from_slice(&packet.payload);
            packet.payload = framed;
            packet.connection = self.protocol.underlying;
            packet.endpoint = self.protocol.server.endpoint;
            actual_send = true;
        }

        let overflow = queue.append(&mut self.deferred);
        if overflow > 0 {
            debug!(overflow, "send queue full, deferred relay messages discarded");
        }

        if actual_send {
            self.protocol.last_sent = now;
        }
    }

    fn peer_allocation(&self, connection: ConnectionId) -> Option<AllocationId> {
        self.connections
            .endpoint(connection)
            .and_then(|ep| ep.as_allocation_id())
    }
}

/// Stage a control message for the relay server in the deferred queue.
///
/// Returns false when the message was not staged; a full queue skips it for
/// this tick.
fn enqueue_control(
    deferred: &mut PacketsQueue,
    protocol: &ProtocolData,
    kind: &'static str,
    write: impl FnOnce(&mut BytesMut) -> Result<(), WriteError>,
) -> bool {
    if deferred.is_full() {
        debug!(kind, "deferred relay queue full");
        record_packet_dropped(LAYER_RELAY, "deferred_full");
        return false;
    }
    let mut buf = BytesMut::new();
    if let Err(e) = write(&mut buf) {
        warn!(kind, error = ?e, "failed to encode relay message");
        return false;
    }
    let packet = Packet::new(buf, protocol.underlying, protocol.server.endpoint);
    if deferred.enqueue(packet).is_err() {
        return false;
    }
    record_relay_control_sent(kind);
    true
}

fn drop_packet(packet: &mut Packet, reason: &'static str) {
    packet.discard();
    record_packet_dropped(LAYER_RELAY, reason);
}
