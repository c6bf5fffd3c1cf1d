//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;
use crate::types::*;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override time between connection attempts (milliseconds)
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,
    /// Override maximum datagram size
    #[arg(long)]
    pub mtu: Option<usize>,
    /// Override relay keep-alive interval (milliseconds)
    #[arg(long)]
    pub heartbeat_ms: Option<u64>,
    /// Override relay server address, e.g. 203.0.113.7:7777
    #[arg(long)]
    pub relay_endpoint: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Minimum TLS version (tls12, tls13)
    #[arg(long)]
    pub tls_min_version: Option<String>,
    /// Maximum TLS version (tls12, tls13)
    #[arg(long)]
    pub tls_max_version: Option<String>,
    /// Client certificate policy: none | optional | required
    #[arg(long)]
    pub client_auth: Option<String>,
    /// Role for sessions created on the send path: server | client
    #[arg(long)]
    pub send_role: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = overrides.connect_timeout_ms {
        config.network.connect_timeout_ms = v;
    }
    if let Some(v) = overrides.mtu {
        config.network.mtu = v;
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if let Some(ref mut relay) = config.relay {
        if let Some(v) = overrides.heartbeat_ms {
            relay.heartbeat_ms = v;
        }
        if let Some(v) = &overrides.relay_endpoint {
            relay.server.endpoint = v.clone();
        }
    }
    // Secure overrides only apply when a secure section exists
    let Some(ref mut secure) = config.secure else {
        return;
    };
    if let Some(v) = &overrides.tls_min_version {
        secure.min_version = v.clone();
    }
    if let Some(v) = &overrides.tls_max_version {
        secure.max_version = v.clone();
    }
    if let Some(v) = overrides.client_auth.as_deref().and_then(parse_client_auth) {
        secure.client_auth = v;
    }
    if let Some(v) = overrides.send_role.as_deref().and_then(parse_role) {
        secure.send_role = v;
    }
}

fn parse_client_auth(s: &str) -> Option<ClientAuthPolicy> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Some(ClientAuthPolicy::None),
        "optional" => Some(ClientAuthPolicy::Optional),
        "required" => Some(ClientAuthPolicy::Required),
        _ => None,
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s.to_ascii_lowercase().as_str() {
        "server" => Some(Role::Server),
        "client" => Some(Role::Client),
        _ => None,
    }
}
