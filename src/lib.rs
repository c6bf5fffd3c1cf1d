//! # strata
//!
//! Protocol layers that sit between a raw datagram transport and a
//! connection API without owning sockets.
//!
//! ## Crates
//!
//! - [`strata_core`] - Endpoints, connection registry, packet queues
//! - [`strata_proto`] - Relay and inner control message framing
//! - [`strata_config`] - Configuration loading and validation
//! - [`strata_metrics`] - Metric names and recording helpers
//! - [`strata_relay`] - Relay layer
//! - [`strata_secure`] - TLS/DTLS secure layer

pub mod cli;

pub use strata_config as config;
pub use strata_core as core;
pub use strata_metrics as metrics;
pub use strata_proto as proto;
pub use strata_relay as relay;
pub use strata_secure as secure;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use strata_config::{Config, load_config, validate_config};
    pub use strata_core::{ConnectionId, ConnectionList, Endpoint, Packet, PacketsQueue};
    pub use strata_relay::{NoUnderlying, RelayConnectionStatus, RelayLayer};
    pub use strata_secure::{
        ConnectionInfo, PacketCommand, RustlsEngineFactory, SecureError, SecureLayer,
    };
}
