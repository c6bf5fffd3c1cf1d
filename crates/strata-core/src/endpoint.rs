//! Peer addressing: transport endpoints and relay allocation ids.

use std::fmt;
use std::net::SocketAddr;

/// Length of a relay allocation id in bytes.
pub const ALLOCATION_ID_LEN: usize = 16;

/// Identity assigned by a relay service to a connected peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocationId(pub [u8; ALLOCATION_ID_LEN]);

impl AllocationId {
    /// Build from a slice; `None` unless it is exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ALLOCATION_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ALLOCATION_ID_LEN] {
        &self.0
    }

    pub fn to_endpoint(self) -> Endpoint {
        Endpoint::Allocation(self)
    }
}

impl fmt::Debug for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AllocationId({})", hex::encode(self.0))
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Addressable identity of a peer.
///
/// Peers reachable only through a relay are addressed by their allocation id;
/// everything else by transport address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endpoint {
    #[default]
    Unspecified,
    Socket(SocketAddr),
    Allocation(AllocationId),
}

impl Endpoint {
    pub fn as_allocation_id(&self) -> Option<AllocationId> {
        match self {
            Endpoint::Allocation(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Socket(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn is_specified(&self) -> bool {
        !matches!(self, Endpoint::Unspecified)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Socket(addr)
    }
}

impl From<AllocationId> for Endpoint {
    fn from(id: AllocationId) -> Self {
        Endpoint::Allocation(id)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unspecified => f.write_str("unspecified"),
            Endpoint::Socket(addr) => write!(f, "{}", addr),
            Endpoint::Allocation(id) => write!(f, "alloc:{}", id),
        }
    }
}
