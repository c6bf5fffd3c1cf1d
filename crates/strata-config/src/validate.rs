//! Configuration validation logic.

use crate::Config;
use crate::loader::ConfigError;

const TLS_VERSIONS: [&str; 2] = ["tls12", "tls13"];

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let net = &config.network;
    if net.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "network.connect_timeout_ms must be > 0".into(),
        ));
    }
    if net.mtu == 0 {
        return Err(ConfigError::Validation("network.mtu must be > 0".into()));
    }
    if net.receive_queue_capacity == 0 || net.send_queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "network queue capacities must be > 0".into(),
        ));
    }

    if let Some(ref relay) = config.relay {
        if relay.heartbeat_ms == 0 {
            return Err(ConfigError::Validation(
                "relay.heartbeat_ms must be > 0".into(),
            ));
        }
        let server = &relay.server;
        server.endpoint_addr()?;
        server.allocation_id_bytes()?;
        server.connection_data_bytes()?;
        server.host_connection_data_bytes()?;
        if server.key_bytes()?.is_empty() {
            return Err(ConfigError::Validation("relay.server.key is empty".into()));
        }
    }

    if let Some(ref secure) = config.secure {
        if !TLS_VERSIONS.contains(&secure.min_version.as_str()) {
            return Err(ConfigError::Validation(format!(
                "secure.min_version must be one of: {:?}",
                TLS_VERSIONS
            )));
        }
        if !TLS_VERSIONS.contains(&secure.max_version.as_str()) {
            return Err(ConfigError::Validation(format!(
                "secure.max_version must be one of: {:?}",
                TLS_VERSIONS
            )));
        }
        // tls13 > tls12
        let min_ord = if secure.min_version == "tls13" { 1 } else { 0 };
        let max_ord = if secure.max_version == "tls13" { 1 } else { 0 };
        if min_ord > max_ord {
            return Err(ConfigError::Validation(
                "secure.min_version cannot be greater than secure.max_version".into(),
            ));
        }
        let (min, max) = secure.handshake_timeouts();
        if min > max {
            return Err(ConfigError::Validation(
                "secure.handshake_timeout_min_ms cannot be greater than handshake_timeout_max_ms"
                    .into(),
            ));
        }
        if secure.certificate.is_some() != secure.private_key.is_some() {
            return Err(ConfigError::Validation(
                "secure.certificate and secure.private_key must be set together".into(),
            ));
        }
        if secure.client_auth == crate::ClientAuthPolicy::Required
            && secure.ca_certificate.is_none()
        {
            return Err(ConfigError::Validation(
                "secure.client_auth = \"required\" needs secure.ca_certificate".into(),
            ));
        }
    }
    Ok(())
}
