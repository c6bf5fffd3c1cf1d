//! Core types and constants shared across strata crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type constants for metrics/logging
//! - Peer addressing ([`Endpoint`], [`AllocationId`])
//! - The connection registry and packet queues the protocol layers operate on

pub mod connection;
pub mod defaults;
pub mod endpoint;
pub mod errors;
pub mod packet;

// Re-export commonly used items at crate root
pub use connection::{
    ConnectionEvent, ConnectionId, ConnectionList, ConnectionState, DisconnectReason,
};
pub use defaults::*;
pub use endpoint::{ALLOCATION_ID_LEN, AllocationId, Endpoint};
pub use errors::*;
pub use packet::{DatagramSink, Packet, PacketsQueue, SendError};

/// Project name.
pub const PROJECT_NAME: &str = "strata";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
