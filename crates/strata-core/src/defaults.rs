//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Network Defaults
// ============================================================================

/// Default time between connection attempts, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
/// Default maximum transmission unit of a single packet (bytes).
pub const DEFAULT_MTU: usize = 1400;
/// Default capacity of the receive queue (packets).
pub const DEFAULT_RECEIVE_QUEUE_CAPACITY: usize = 512;
/// Default capacity of the send queue (packets).
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 512;

// ============================================================================
// Relay Defaults
// ============================================================================

/// Default interval between keep-alive pings to the relay server, in milliseconds.
pub const DEFAULT_RELAY_HEARTBEAT_MS: u64 = 9000;
/// Capacity of the relay layer's deferred control-message queue.
pub const DEFERRED_SEND_QUEUE_CAPACITY: usize = 10;

// ============================================================================
// Secure Defaults
// ============================================================================

/// Default minimum handshake retransmission timeout, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MIN_MS: u32 = 1000;
/// Default maximum handshake duration, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MAX_MS: u32 = 60000;
/// Default engine read timeout (0 = none).
pub const DEFAULT_READ_TIMEOUT_MS: u32 = 0;
/// Default minimum TLS version.
pub const DEFAULT_TLS_MIN_VERSION: &str = "tls12";
/// Default maximum TLS version.
pub const DEFAULT_TLS_MAX_VERSION: &str = "tls13";
/// Smallest payload size that fits the largest key-exchange flight.
pub const MIN_SECURE_PAYLOAD_SIZE: usize = 2000;
