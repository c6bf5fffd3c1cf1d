//! Relay layer for strata.
//!
//! Multiplexes logical peer connections over a single physical connection to
//! a relay server. Peers are identified by their relay allocation ids; the
//! relay forwards datagrams wrapped in a small envelope.
//!
//! # Relay session
//!
//! ```text
//! NotEstablished ──Bind / BindReceived──▶ Established ──Error 1|4──▶ AllocationInvalid
//! ```
//!
//! Error 3 (client mismatch) keeps the status and re-sends Bind with the
//! nonce incremented.
//!
//! The layer owns no sockets: the driver feeds received packets to
//! [`RelayLayer::receive`] and outbound packets to [`RelayLayer::send`] once
//! per tick.

pub mod endpoints;
pub mod error;
pub mod layer;
pub mod state;

pub use endpoints::EndpointIndex;
pub use error::RelayError;
pub use layer::RelayLayer;
pub use state::{NoUnderlying, RelayConnectionStatus, RelayServerData, UnderlyingConnections};
