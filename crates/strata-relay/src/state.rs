//! Relay session state shared by the receive and send passes.

use std::fmt;

use strata_config::{RelayConfig, RelayServerConfig};
use strata_core::{AllocationId, ConnectionId, ConnectionList, ConnectionState, Endpoint};

use crate::error::RelayError;

/// Binding status with the relay server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayConnectionStatus {
    /// No BindReceived yet; Bind is retried every connect timeout.
    #[default]
    NotEstablished,
    /// The relay acknowledged our Bind.
    Established,
    /// The relay forgot or expired our allocation. A new one is required.
    AllocationInvalid,
}

impl RelayConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayConnectionStatus::NotEstablished => "not_established",
            RelayConnectionStatus::Established => "established",
            RelayConnectionStatus::AllocationInvalid => "allocation_invalid",
        }
    }
}

impl fmt::Display for RelayConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded relay server descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayServerData {
    pub endpoint: Endpoint,
    pub allocation_id: AllocationId,
    pub connection_data: Vec<u8>,
    pub host_connection_data: Vec<u8>,
    pub key: Vec<u8>,
    pub nonce: u16,
    pub accept_mode: u8,
}

impl RelayServerData {
    pub fn from_config(cfg: &RelayServerConfig) -> Result<Self, RelayError> {
        Ok(Self {
            endpoint: cfg.endpoint_addr()?.into(),
            allocation_id: AllocationId(cfg.allocation_id_bytes()?),
            connection_data: cfg.connection_data_bytes()?,
            host_connection_data: cfg.host_connection_data_bytes()?,
            key: cfg.key_bytes()?,
            nonce: cfg.nonce,
            accept_mode: cfg.accept_mode,
        })
    }
}

// Keep the HMAC key out of logs.
impl fmt::Debug for RelayServerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServerData")
            .field("endpoint", &self.endpoint)
            .field("allocation_id", &self.allocation_id)
            .field("nonce", &self.nonce)
            .field("accept_mode", &self.accept_mode)
            .finish_non_exhaustive()
    }
}

/// Singleton relay session state.
#[derive(Debug)]
pub(crate) struct ProtocolData {
    pub status: RelayConnectionStatus,
    pub server: RelayServerData,
    /// The single physical connection to the relay server.
    pub underlying: ConnectionId,
    /// Last transmission; while not established, the last Bind attempt.
    pub last_sent: i64,
    pub connect_timeout: i64,
    pub heartbeat: i64,
    pub ping_sequence: u16,
    /// A relay error asked for a rebind that has not been staged yet.
    pub rebind_pending: bool,
}

impl ProtocolData {
    pub fn new(connect_timeout_ms: u64, relay: &RelayConfig) -> Result<Self, RelayError> {
        Ok(Self {
            status: RelayConnectionStatus::NotEstablished,
            server: RelayServerData::from_config(&relay.server)?,
            underlying: ConnectionId::NULL,
            last_sent: 0,
            connect_timeout: i64::try_from(connect_timeout_ms).unwrap_or(i64::MAX),
            heartbeat: i64::try_from(relay.heartbeat_ms).unwrap_or(i64::MAX),
            ping_sequence: 0,
            rebind_pending: false,
        })
    }

    pub fn next_ping_sequence(&mut self) -> u16 {
        let seq = self.ping_sequence;
        self.ping_sequence = self.ping_sequence.wrapping_add(1);
        seq
    }
}

/// Per-peer connect retry bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConnectionRetry {
    pub last_connect_attempt: i64,
}

/// Access to the physical connection beneath the relay layer.
pub trait UnderlyingConnections {
    /// Make sure a connection to `endpoint` exists, storing its id in
    /// `connection`. Returns true once it is usable.
    fn try_connect(&mut self, endpoint: &Endpoint, connection: &mut ConnectionId) -> bool;
}

/// Used when the relay layer sits directly on a connectionless transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUnderlying;

impl UnderlyingConnections for NoUnderlying {
    fn try_connect(&mut self, _endpoint: &Endpoint, _connection: &mut ConnectionId) -> bool {
        true
    }
}

impl UnderlyingConnections for ConnectionList {
    fn try_connect(&mut self, endpoint: &Endpoint, connection: &mut ConnectionId) -> bool {
        if self.state(*connection) == ConnectionState::Disconnected {
            *connection = self.start_connecting(*endpoint);
        }
        self.state(*connection) == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_list_connects_once() {
        let mut list = ConnectionList::new();
        let endpoint: Endpoint = "10.0.0.1:7777".parse::<std::net::SocketAddr>().unwrap().into();
        let mut underlying = ConnectionId::NULL;

        assert!(!list.try_connect(&endpoint, &mut underlying));
        let first = underlying;
        assert!(!first.is_null());
        assert!(!list.try_connect(&endpoint, &mut underlying));
        assert_eq!(underlying, first);
        assert_eq!(list.count(), 1);

        list.finish_connecting_from_local(first);
        assert!(list.try_connect(&endpoint, &mut underlying));
    }

    #[test]
    fn no_underlying_is_always_ready() {
        let mut underlying = ConnectionId::NULL;
        assert!(NoUnderlying.try_connect(&Endpoint::Unspecified, &mut underlying));
        assert!(underlying.is_null());
    }
}
