//! Metrics instrumentation for the strata protocol layers.
//!
//! Everything is recorded through the `metrics` facade; installing an
//! exporter is left to the embedding application.

use metrics::{counter, gauge, histogram};

// ============================================================================
// Metric Names
// ============================================================================

/// Packets dropped by a layer, labelled by layer and reason.
pub const PACKETS_DROPPED_TOTAL: &str = "strata_packets_dropped_total";
/// Control messages the relay layer queued for the relay server.
pub const RELAY_CONTROL_SENT_TOTAL: &str = "strata_relay_control_sent_total";
/// Error messages received from the relay server, by code.
pub const RELAY_ERRORS_TOTAL: &str = "strata_relay_errors_total";
/// Finished handshakes by role and result.
pub const SECURE_HANDSHAKES_TOTAL: &str = "strata_secure_handshakes_total";
/// Handshake duration histogram (seconds).
pub const SECURE_HANDSHAKE_DURATION_SECONDS: &str = "strata_secure_handshake_duration_seconds";
/// Number of live secure sessions.
pub const SECURE_SESSIONS_ACTIVE: &str = "strata_secure_sessions_active";
/// Plaintext bytes handed to the engine for encryption.
pub const SECURE_BYTES_ENCRYPTED_TOTAL: &str = "strata_secure_bytes_encrypted_total";
/// Errors by type label (see `strata_core::errors`).
pub const ERRORS_TOTAL: &str = "strata_errors_total";

/// Layer labels.
pub const LAYER_RELAY: &str = "relay";
pub const LAYER_SECURE: &str = "secure";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a dropped packet (reason: "truncated", "invalid_header", ...).
#[inline]
pub fn record_packet_dropped(layer: &'static str, reason: &'static str) {
    counter!(PACKETS_DROPPED_TOTAL, "layer" => layer, "reason" => reason).increment(1);
}

/// Record a relay control message queued (kind: "bind", "ping", ...).
#[inline]
pub fn record_relay_control_sent(kind: &'static str) {
    counter!(RELAY_CONTROL_SENT_TOTAL, "kind" => kind).increment(1);
}

#[inline]
pub fn record_relay_error(code: u8) {
    counter!(RELAY_ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Record a finished handshake (result: "success" or "failure").
#[inline]
pub fn record_handshake(role: &'static str, result: &'static str) {
    counter!(SECURE_HANDSHAKES_TOTAL, "role" => role, "result" => result).increment(1);
}

/// Record how long a successful handshake took.
#[inline]
pub fn record_handshake_duration(duration_ms: i64) {
    histogram!(SECURE_HANDSHAKE_DURATION_SECONDS).record(duration_ms.max(0) as f64 / 1000.0);
}

#[inline]
pub fn record_session_created() {
    gauge!(SECURE_SESSIONS_ACTIVE).increment(1.0);
}

#[inline]
pub fn record_session_removed() {
    gauge!(SECURE_SESSIONS_ACTIVE).decrement(1.0);
}

#[inline]
pub fn record_bytes_encrypted(bytes: u64) {
    counter!(SECURE_BYTES_ENCRYPTED_TOTAL).increment(bytes);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}
