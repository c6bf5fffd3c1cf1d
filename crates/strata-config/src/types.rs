//! Configuration type definitions for network, relay, secure layer, and logging.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::defaults::*;
use crate::loader::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Time between connection attempts, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum size of a single datagram on the wire.
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_receive_queue_capacity")]
    pub receive_queue_capacity: usize,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            mtu: default_mtu(),
            receive_queue_capacity: default_receive_queue_capacity(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Keep-alive ping interval while bound, in milliseconds.
    #[serde(default = "default_relay_heartbeat_ms")]
    pub heartbeat_ms: u64,
    pub server: RelayServerConfig,
}

/// Relay server descriptor as handed out by the allocation service.
///
/// Binary fields are hex strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayServerConfig {
    /// Relay server address, e.g. "203.0.113.7:7777".
    pub endpoint: String,
    /// Our allocation id (16 bytes).
    pub allocation_id: String,
    /// Our connection data (at most 255 bytes).
    #[serde(default)]
    pub connection_data: String,
    /// Connection data of the host we connect to as a client (at most 255 bytes).
    #[serde(default)]
    pub host_connection_data: String,
    /// HMAC key used to sign Bind messages.
    pub key: String,
    #[serde(default)]
    pub nonce: u16,
    #[serde(default)]
    pub accept_mode: u8,
}

impl RelayServerConfig {
    pub fn endpoint_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.endpoint.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "relay.server.endpoint is not a socket address: {}",
                self.endpoint
            ))
        })
    }

    pub fn allocation_id_bytes(&self) -> Result<[u8; 16], ConfigError> {
        let bytes = decode_hex("relay.server.allocation_id", &self.allocation_id)?;
        bytes.try_into().map_err(|_| {
            ConfigError::Validation("relay.server.allocation_id must be 16 bytes".into())
        })
    }

    pub fn connection_data_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        decode_connection_data("relay.server.connection_data", &self.connection_data)
    }

    pub fn host_connection_data_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        decode_connection_data("relay.server.host_connection_data", &self.host_connection_data)
    }

    pub fn key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        decode_hex("relay.server.key", &self.key)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    hex::decode(value.trim())
        .map_err(|e| ConfigError::Validation(format!("{field} is not valid hex: {e}")))
}

fn decode_connection_data(field: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    let bytes = decode_hex(field, value)?;
    if bytes.len() > 255 {
        return Err(ConfigError::Validation(format!(
            "{field} exceeds 255 bytes ({})",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Whether the secure layer runs over a reliable stream or datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Tls,
    #[default]
    Dtls,
}

/// Client certificate policy on the server role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthPolicy {
    None,
    #[default]
    Optional,
    Required,
}

/// Handshake role of a secure session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    #[default]
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureConfig {
    /// Certificate chain, inline PEM or a file path.
    #[serde(default)]
    pub certificate: Option<String>,
    /// Private key, inline PEM or a file path.
    #[serde(default)]
    pub private_key: Option<String>,
    /// CA bundle used to verify the peer, inline PEM or a file path.
    #[serde(default)]
    pub ca_certificate: Option<String>,
    /// Server name the client role expects in the peer certificate.
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub transport: TransportMode,
    #[serde(default)]
    pub client_auth: ClientAuthPolicy,
    /// Engine read timeout in milliseconds (0 = none).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u32,
    /// Handshake timeout bounds in milliseconds; 0 selects the default.
    #[serde(default = "default_handshake_timeout_min_ms")]
    pub handshake_timeout_min_ms: u32,
    #[serde(default = "default_handshake_timeout_max_ms")]
    pub handshake_timeout_max_ms: u32,
    /// Minimum TLS version (tls12, tls13). Default: tls12
    #[serde(default = "default_min_tls_version")]
    pub min_version: String,
    /// Maximum TLS version (tls12, tls13). Default: tls13
    #[serde(default = "default_max_tls_version")]
    pub max_version: String,
    /// Role used for sessions created on the send path.
    #[serde(default)]
    pub send_role: Role,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            certificate: None,
            private_key: None,
            ca_certificate: None,
            hostname: None,
            transport: TransportMode::default(),
            client_auth: ClientAuthPolicy::default(),
            read_timeout_ms: default_read_timeout_ms(),
            handshake_timeout_min_ms: default_handshake_timeout_min_ms(),
            handshake_timeout_max_ms: default_handshake_timeout_max_ms(),
            min_version: default_min_tls_version(),
            max_version: default_max_tls_version(),
            send_role: Role::default(),
        }
    }
}

impl SecureConfig {
    /// Handshake timeout bounds with zero values replaced by the defaults.
    pub fn handshake_timeouts(&self) -> (u32, u32) {
        let min = match self.handshake_timeout_min_ms {
            0 => default_handshake_timeout_min_ms(),
            v => v,
        };
        let max = match self.handshake_timeout_max_ms {
            0 => default_handshake_timeout_max_ms(),
            v => v,
        };
        (min, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"strata_relay": "debug", "rustls": "warn"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(allocation_id: &str, connection_data: &str) -> RelayServerConfig {
        RelayServerConfig {
            endpoint: "127.0.0.1:7777".into(),
            allocation_id: allocation_id.into(),
            connection_data: connection_data.into(),
            host_connection_data: String::new(),
            key: "00ff".into(),
            nonce: 0,
            accept_mode: 0,
        }
    }

    #[test]
    fn secure_config_defaults() {
        let cfg = SecureConfig::default();
        assert_eq!(cfg.transport, TransportMode::Dtls);
        assert_eq!(cfg.client_auth, ClientAuthPolicy::Optional);
        assert_eq!(cfg.send_role, Role::Server);
        assert_eq!(cfg.handshake_timeouts(), (1000, 60000));
        assert_eq!(cfg.min_version, "tls12");
    }

    #[test]
    fn zero_handshake_timeouts_fall_back() {
        let toml_str = r#"
handshake_timeout_min_ms = 0
handshake_timeout_max_ms = 5000
client_auth = "required"
transport = "tls"
send_role = "client"
"#;
        let cfg: SecureConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.handshake_timeouts(), (1000, 5000));
        assert_eq!(cfg.client_auth, ClientAuthPolicy::Required);
        assert_eq!(cfg.transport, TransportMode::Tls);
        assert_eq!(cfg.send_role, Role::Client);
    }

    #[test]
    fn relay_server_decodes_hex_fields() {
        let cfg = server("000102030405060708090a0b0c0d0e0f", "cafe");
        let id = cfg.allocation_id_bytes().unwrap();
        assert_eq!(id[15], 0x0f);
        assert_eq!(cfg.connection_data_bytes().unwrap(), vec![0xca, 0xfe]);
        assert_eq!(cfg.key_bytes().unwrap(), vec![0x00, 0xff]);
        assert!(cfg.host_connection_data_bytes().unwrap().is_empty());
        assert_eq!(cfg.endpoint_addr().unwrap().port(), 7777);
    }

    #[test]
    fn relay_server_rejects_bad_fields() {
        assert!(server("0001", "").allocation_id_bytes().is_err());
        assert!(server("zz", "").allocation_id_bytes().is_err());
        let long = "ab".repeat(256);
        assert!(server("00", &long).connection_data_bytes().is_err());

        let mut cfg = server("00", "");
        cfg.endpoint = "relay.example".into();
        assert!(cfg.endpoint_addr().is_err());
    }
}
