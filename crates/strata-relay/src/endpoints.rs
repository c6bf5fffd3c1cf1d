//! Bijective map between peer endpoints and connection ids.

use std::collections::HashMap;

use strata_core::{ConnectionId, Endpoint};

/// Endpoint ↔ connection index.
///
/// Inserting a pair evicts any mapping either side already had, so lookups in
/// both directions always agree.
#[derive(Debug, Default)]
pub struct EndpointIndex {
    by_endpoint: HashMap<Endpoint, ConnectionId>,
    by_connection: HashMap<ConnectionId, Endpoint>,
}

impl EndpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, endpoint: Endpoint, connection: ConnectionId) {
        self.remove_endpoint(&endpoint);
        self.remove_connection(connection);
        self.by_endpoint.insert(endpoint, connection);
        self.by_connection.insert(connection, endpoint);
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<ConnectionId> {
        self.by_endpoint.get(endpoint).copied()
    }

    pub fn remove_endpoint(&mut self, endpoint: &Endpoint) -> Option<ConnectionId> {
        let connection = self.by_endpoint.remove(endpoint)?;
        self.by_connection.remove(&connection);
        Some(connection)
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) -> Option<Endpoint> {
        let endpoint = self.by_connection.remove(&connection)?;
        self.by_endpoint.remove(&endpoint);
        Some(endpoint)
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.by_endpoint.len(), self.by_connection.len());
        self.by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_endpoint.clear();
        self.by_connection.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{AllocationId, ConnectionList};

    fn ep(b: u8) -> Endpoint {
        AllocationId([b; 16]).to_endpoint()
    }

    #[test]
    fn insert_evicts_both_sides() {
        let mut list = ConnectionList::new();
        let a = list.start_connecting(Endpoint::Unspecified);
        let b = list.start_connecting(Endpoint::Unspecified);

        let mut index = EndpointIndex::new();
        index.insert(ep(1), a);
        index.insert(ep(2), b);
        assert_eq!(index.len(), 2);

        // Re-point endpoint 1 at connection b: b's old endpoint and a's mapping go away.
        index.insert(ep(1), b);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&ep(1)), Some(b));
        assert_eq!(index.get(&ep(2)), None);
        assert_eq!(index.remove_connection(a), None);
        assert_eq!(index.remove_connection(b), Some(ep(1)));
        assert!(index.is_empty());
    }

    #[test]
    fn removal_from_either_side() {
        let mut list = ConnectionList::new();
        let a = list.start_connecting(Endpoint::Unspecified);
        let mut index = EndpointIndex::new();

        index.insert(ep(1), a);
        assert_eq!(index.remove_connection(a), Some(ep(1)));
        assert!(index.is_empty());

        index.insert(ep(1), a);
        assert_eq!(index.remove_endpoint(&ep(1)), Some(a));
        assert_eq!(index.remove_connection(a), None);
        assert_eq!(index.remove_endpoint(&ep(1)), None);
    }
}
