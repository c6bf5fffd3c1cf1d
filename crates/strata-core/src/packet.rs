//! In-flight datagrams and the bounded queues that carry them between layers.

use bytes::BytesMut;

use crate::connection::ConnectionId;
use crate::endpoint::Endpoint;

/// A single datagram moving through the layer stack.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Bytes of the packet as seen by the current layer.
    pub payload: BytesMut,
    /// Logical connection the packet belongs to.
    pub connection: ConnectionId,
    /// Where the packet came from or is going to.
    pub endpoint: Endpoint,
    discarded: bool,
}

impl Packet {
    pub fn new(payload: BytesMut, connection: ConnectionId, endpoint: Endpoint) -> Self {
        Self {
            payload,
            connection,
            endpoint,
            discarded: false,
        }
    }

    pub fn from_slice(data: &[u8], endpoint: Endpoint) -> Self {
        Self::new(BytesMut::from(data), ConnectionId::NULL, endpoint)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Drop the packet in place; it will not reach the next layer.
    pub fn discard(&mut self) {
        self.discarded = true;
        self.payload.clear();
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }
}

/// Bounded queue of packets.
#[derive(Debug)]
pub struct PacketsQueue {
    packets: Vec<Packet>,
    capacity: usize,
}

impl PacketsQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.packets.len() >= self.capacity
    }

    /// Append a packet, handing it back when the queue is full.
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), Packet> {
        if self.is_full() {
            return Err(packet);
        }
        self.packets.push(packet);
        Ok(())
    }

    pub fn get(&self, i: usize) -> Option<&Packet> {
        self.packets.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Packet> {
        self.packets.get_mut(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.packets.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Packet> {
        self.packets.iter_mut()
    }

    /// Packets that have not been discarded.
    pub fn delivered(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter().filter(|p| !p.is_discarded())
    }

    /// Move every packet of `other` into this queue and clear `other`.
    ///
    /// Returns how many packets did not fit and were dropped.
    pub fn append(&mut self, other: &mut PacketsQueue) -> usize {
        let room = self.capacity.saturating_sub(self.packets.len());
        let mut overflow = 0;
        for (i, packet) in other.packets.drain(..).enumerate() {
            if i < room {
                self.packets.push(packet);
            } else {
                overflow += 1;
            }
        }
        overflow
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Packet> {
        self.packets.drain(..)
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

/// Why the transport refused a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send queue full")]
    QueueFull,
    #[error("endpoint unreachable")]
    Unreachable,
}

/// Outbound side of the raw network interface.
pub trait DatagramSink {
    /// Hand one datagram to the transport.
    fn send_to(&mut self, endpoint: &Endpoint, data: &[u8]) -> Result<(), SendError>;
}

impl DatagramSink for PacketsQueue {
    fn send_to(&mut self, endpoint: &Endpoint, data: &[u8]) -> Result<(), SendError> {
        self.enqueue(Packet::from_slice(data, *endpoint))
            .map_err(|_| SendError::QueueFull)
    }
}
