//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// TLS/DTLS handshake error.
pub const ERROR_HANDSHAKE: &str = "handshake";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// Engine read/write error after the handshake.
pub const ERROR_ENGINE: &str = "engine";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
/// Queue or send-interface exhaustion.
pub const ERROR_BACKPRESSURE: &str = "backpressure";
/// Missing per-endpoint session state.
pub const ERROR_SESSION: &str = "session";
