//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `strata_core::defaults`.

use strata_core::defaults;

/// Generate default value functions that forward to strata_core::defaults constants.
macro_rules! default_fns {
    // For Copy types (integers, bool, etc.)
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_connect_timeout_ms       => DEFAULT_CONNECT_TIMEOUT_MS: u64,
    default_mtu                      => DEFAULT_MTU: usize,
    default_receive_queue_capacity   => DEFAULT_RECEIVE_QUEUE_CAPACITY: usize,
    default_send_queue_capacity      => DEFAULT_SEND_QUEUE_CAPACITY: usize,
    default_relay_heartbeat_ms       => DEFAULT_RELAY_HEARTBEAT_MS: u64,
    default_handshake_timeout_min_ms => DEFAULT_HANDSHAKE_TIMEOUT_MIN_MS: u32,
    default_handshake_timeout_max_ms => DEFAULT_HANDSHAKE_TIMEOUT_MAX_MS: u32,
    default_read_timeout_ms          => DEFAULT_READ_TIMEOUT_MS: u32,
}

default_string_fns! {
    default_min_tls_version => DEFAULT_TLS_MIN_VERSION,
    default_max_tls_version => DEFAULT_TLS_MAX_VERSION,
}
