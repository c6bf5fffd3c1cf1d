//! Generic connection registry.
//!
//! Owns connection ids and their lifecycle states. Protocol layers drive the
//! transitions; the upper API observes them through [`ConnectionEvent`]s.
//!
//! ```text
//!  Connecting ──finish_connecting──▶ Connected
//!      │                                 │
//!      └─────────start_disconnecting─────┤
//!                                        ▼
//!                                  Disconnecting ──finish_disconnecting──▶ Disconnected
//! ```

use std::fmt;

use crate::endpoint::Endpoint;

/// Opaque connection handle: slot index plus generation.
///
/// A handle whose slot has been released and reused no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    /// Handle that never refers to a live connection.
    pub const NULL: ConnectionId = ConnectionId {
        index: 0,
        generation: 0,
    };

    pub fn is_null(&self) -> bool {
        self.generation == 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Generic lifecycle state shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed locally by the application.
    Default,
    /// The peer announced the close.
    ClosedByRemote,
    /// The layer refused the connection (e.g. a second outbound connect).
    Rejected,
}

/// Lifecycle notifications for the upper connection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        id: ConnectionId,
        initiated_locally: bool,
    },
    Disconnected {
        id: ConnectionId,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    state: ConnectionState,
    endpoint: Endpoint,
}

/// Registry of connections for one layer.
#[derive(Debug, Default)]
pub struct ConnectionList {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: Vec<ConnectionId>,
    events: Vec<ConnectionEvent>,
}

impl ConnectionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (not yet finished) connections.
    pub fn count(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Live connection at position `i`, in creation order.
    pub fn connection_at(&self, i: usize) -> Option<ConnectionId> {
        self.live.get(i).copied()
    }

    /// Snapshot of the live ids, safe to iterate while mutating the list.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.live.clone()
    }

    /// Allocate a new connection in the `Connecting` state.
    pub fn start_connecting(&mut self, endpoint: Endpoint) -> ConnectionId {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1).max(1);
                slot.state = ConnectionState::Connecting;
                slot.endpoint = endpoint;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    state: ConnectionState::Connecting,
                    endpoint,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = ConnectionId {
            index,
            generation: self.slots[index as usize].generation,
        };
        self.live.push(id);
        id
    }

    /// Complete a connection we initiated. Returns false unless it was `Connecting`.
    pub fn finish_connecting_from_local(&mut self, id: ConnectionId) -> bool {
        self.finish_connecting(id, true)
    }

    /// Complete a connection the peer initiated. Returns false unless it was `Connecting`.
    pub fn finish_connecting_from_remote(&mut self, id: ConnectionId) -> bool {
        self.finish_connecting(id, false)
    }

    fn finish_connecting(&mut self, id: ConnectionId, initiated_locally: bool) -> bool {
        match self.slot_mut(id) {
            Some(slot) if slot.state == ConnectionState::Connecting => {
                slot.state = ConnectionState::Connected;
                self.events.push(ConnectionEvent::Connected {
                    id,
                    initiated_locally,
                });
                true
            }
            _ => false,
        }
    }

    /// Move a connecting or connected connection to `Disconnecting`.
    pub fn start_disconnecting(&mut self, id: ConnectionId) -> bool {
        match self.slot_mut(id) {
            Some(slot)
                if matches!(
                    slot.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) =>
            {
                slot.state = ConnectionState::Disconnecting;
                true
            }
            _ => false,
        }
    }

    /// Finish a disconnect and release the slot.
    pub fn finish_disconnecting(&mut self, id: ConnectionId, reason: DisconnectReason) -> bool {
        match self.slot_mut(id) {
            Some(slot) if slot.state == ConnectionState::Disconnecting => {
                slot.state = ConnectionState::Disconnected;
                slot.endpoint = Endpoint::Unspecified;
            }
            _ => return false,
        }
        self.live.retain(|live| *live != id);
        self.free.push(id.index);
        self.events.push(ConnectionEvent::Disconnected { id, reason });
        true
    }

    pub fn update_endpoint(&mut self, id: ConnectionId, endpoint: Endpoint) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.endpoint = endpoint;
                true
            }
            None => false,
        }
    }

    pub fn endpoint(&self, id: ConnectionId) -> Option<Endpoint> {
        self.slot(id).map(|slot| slot.endpoint)
    }

    /// State of `id`; stale or unknown handles report `Disconnected`.
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.slot(id)
            .map(|slot| slot.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Take the lifecycle events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    fn slot(&self, id: ConnectionId) -> Option<&Slot> {
        if id.is_null() {
            return None;
        }
        self.slots
            .get(id.index as usize)
            .filter(|slot| {
                slot.generation == id.generation && slot.state != ConnectionState::Disconnected
            })
    }

    fn slot_mut(&mut self, id: ConnectionId) -> Option<&mut Slot> {
        if id.is_null() {
            return None;
        }
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| {
                slot.generation == id.generation && slot.state != ConnectionState::Disconnected
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::AllocationId;

    #[test]
    fn lifecycle_emits_events() {
        let mut list = ConnectionList::new();
        let id = list.start_connecting(Endpoint::Unspecified);
        assert_eq!(list.state(id), ConnectionState::Connecting);
        assert!(list.finish_connecting_from_local(id));
        assert_eq!(list.state(id), ConnectionState::Connected);
        assert!(list.start_disconnecting(id));
        assert!(list.finish_disconnecting(id, DisconnectReason::ClosedByRemote));
        assert_eq!(list.state(id), ConnectionState::Disconnected);
        assert_eq!(list.count(), 0);

        let events = list.drain_events();
        assert_eq!(
            events,
            vec![
                ConnectionEvent::Connected {
                    id,
                    initiated_locally: true
                },
                ConnectionEvent::Disconnected {
                    id,
                    reason: DisconnectReason::ClosedByRemote
                },
            ]
        );
        assert!(list.drain_events().is_empty());
    }

    #[test]
    fn stale_handle_does_not_resolve_after_reuse() {
        let mut list = ConnectionList::new();
        let first = list.start_connecting(Endpoint::Unspecified);
        list.start_disconnecting(first);
        list.finish_disconnecting(first, DisconnectReason::Default);

        let ep = AllocationId([3u8; 16]).to_endpoint();
        let second = list.start_connecting(ep);
        assert_ne!(first, second);
        assert_eq!(list.endpoint(first), None);
        assert_eq!(list.endpoint(second), Some(ep));
        assert!(!list.finish_connecting_from_remote(first));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut list = ConnectionList::new();
        let id = list.start_connecting(Endpoint::Unspecified);
        assert!(!list.finish_disconnecting(id, DisconnectReason::Default));
        assert!(list.finish_connecting_from_remote(id));
        assert!(!list.finish_connecting_from_remote(id));
        assert!(!list.start_disconnecting(ConnectionId::NULL));
        assert_eq!(list.state(id), ConnectionState::Connected);
        assert_eq!(list.count(), 1);
    }
}
